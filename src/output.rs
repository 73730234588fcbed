//! Terminal rendering for pipeline events.
//!
//! Partials are drawn in-place on stderr so a scrolling session stays
//! readable; finals go to stdout where they can be piped.

use std::io::{self, Write};

use crate::types::PipelineEvent;

const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Partials longer than this are truncated from the front so the live line
/// always shows the most recent words.
const PARTIAL_DISPLAY_WIDTH: usize = 140;

/// Clear the current terminal line (replaces a pending partial).
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Render one pipeline event to the terminal.
pub fn render(event: &PipelineEvent) {
    match event {
        PipelineEvent::Partial { text } => {
            clear_line();
            eprint!("{DIM}{}{RESET}", tail_of(text, PARTIAL_DISPLAY_WIDTH));
            let _ = io::stderr().flush();
        }
        PipelineEvent::Final { text } => {
            clear_line();
            println!("{}", text);
            let _ = io::stdout().flush();
        }
        PipelineEvent::Info { text } => {
            clear_line();
            eprintln!("{DIM}[{}]{RESET}", text);
        }
        PipelineEvent::Error { text } => {
            clear_line();
            eprintln!("{RED}error: {}{RESET}", text);
        }
    }
}

/// The last `width` characters of `text`, with an ellipsis when truncated.
fn tail_of(text: &str, width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    let tail: String = chars[chars.len() - width..].iter().collect();
    format!("…{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(tail_of("hello", 140), "hello");
    }

    #[test]
    fn long_text_keeps_the_tail() {
        let text = "a".repeat(150) + "END";
        let shown = tail_of(&text, 10);
        assert!(shown.ends_with("END"));
        assert!(shown.starts_with('…'));
        assert_eq!(shown.chars().count(), 11);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        let text = "ğüşıöç".repeat(40);
        let shown = tail_of(&text, 20);
        assert_eq!(shown.chars().count(), 21);
    }

    #[test]
    fn render_smoke() {
        // Rendering must not panic on any variant.
        render(&PipelineEvent::Partial {
            text: "partial".to_string(),
        });
        render(&PipelineEvent::Final {
            text: "final".to_string(),
        });
        render(&PipelineEvent::Info {
            text: "connected".to_string(),
        });
        render(&PipelineEvent::Error {
            text: "boom".to_string(),
        });
    }
}
