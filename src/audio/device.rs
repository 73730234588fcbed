//! Input device selection and enumeration.
//!
//! Selector parsing and name matching are pure functions so they stay
//! testable without audio hardware; the cpal-backed enumeration lives behind
//! the `cpal-audio` feature.

/// How the user identified the capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Use the host's default input device.
    SystemDefault,
    /// `#N` — the Nth input-capable device in enumeration order.
    Index(usize),
    /// Case-insensitive name match, exact first, then substring.
    Name(String),
}

impl DeviceSelector {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("default")
            || trimmed.eq_ignore_ascii_case("auto")
        {
            return DeviceSelector::SystemDefault;
        }
        if let Some(digits) = trimmed.strip_prefix('#')
            && !digits.is_empty()
            && let Ok(index) = digits.parse::<usize>()
        {
            return DeviceSelector::Index(index);
        }
        DeviceSelector::Name(trimmed.to_string())
    }
}

/// Find the index of `wanted` in `names`: exact case-insensitive match
/// first, then first case-insensitive substring match.
pub fn match_name(names: &[String], wanted: &str) -> Option<usize> {
    let wanted_lower = wanted.to_lowercase();
    if let Some(i) = names
        .iter()
        .position(|n| n.to_lowercase() == wanted_lower)
    {
        return Some(i);
    }
    names
        .iter()
        .position(|n| n.to_lowercase().contains(&wanted_lower))
}

#[cfg(feature = "cpal-audio")]
mod hw {
    use super::{DeviceSelector, match_name};
    use crate::error::{LivescribeError, Result};
    use cpal::traits::{DeviceTrait, HostTrait};

    /// Run a closure with stderr temporarily redirected to /dev/null.
    ///
    /// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
    /// when probing audio backends. The messages are harmless but confusing
    /// to users.
    ///
    /// # Safety
    /// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2
    /// (stderr). Safe as long as no other thread is concurrently
    /// manipulating fd 2.
    pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        unsafe {
            let saved_fd = libc::dup(2);
            let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
            if saved_fd >= 0 && devnull >= 0 {
                libc::dup2(devnull, 2);
                libc::close(devnull);
            }

            let result = f();

            if saved_fd >= 0 {
                libc::dup2(saved_fd, 2);
                libc::close(saved_fd);
            }

            result
        }
    }

    /// Names of all input-capable devices in enumeration order.
    ///
    /// A device whose name cannot be read still occupies its slot as
    /// `#{n}`, so listed indices stay valid `Index` selectors for
    /// `open_device`.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let devices = with_suppressed_stderr(|| cpal::default_host().input_devices())
            .map_err(|e| LivescribeError::AudioCapture {
                message: format!("failed to enumerate input devices: {}", e),
            })?;

        let names = devices
            .enumerate()
            .map(|(n, device)| device.name().unwrap_or_else(|_| format!("#{}", n)))
            .collect();
        Ok(names)
    }

    /// Resolve a selector to an index into the input device list.
    ///
    /// `None` means "use the host default device". A `Name` selector that
    /// matches nothing is an error carrying the full device list so the
    /// user can pick a working one.
    pub fn resolve(selector: &DeviceSelector) -> Result<Option<usize>> {
        match selector {
            DeviceSelector::SystemDefault => Ok(None),
            DeviceSelector::Index(i) => Ok(Some(*i)),
            DeviceSelector::Name(wanted) => {
                let names = list_input_devices()?;
                match match_name(&names, wanted) {
                    Some(i) => Ok(Some(i)),
                    None => Err(LivescribeError::DeviceNotFound {
                        selector: wanted.clone(),
                        available: names,
                    }),
                }
            }
        }
    }

    /// Open the device at `index`, or the host default when `None`.
    pub fn open_device(index: Option<usize>) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            match index {
                None => host.default_input_device().ok_or_else(|| {
                    LivescribeError::DeviceNotFound {
                        selector: "default".to_string(),
                        available: vec![],
                    }
                }),
                Some(i) => {
                    let devices =
                        host.input_devices()
                            .map_err(|e| LivescribeError::AudioCapture {
                                message: format!("failed to enumerate input devices: {}", e),
                            })?;
                    let mut names = Vec::new();
                    for (n, device) in devices.enumerate() {
                        if n == i {
                            return Ok(device);
                        }
                        names.push(device.name().unwrap_or_else(|_| format!("#{}", n)));
                    }
                    Err(LivescribeError::DeviceNotFound {
                        selector: format!("#{}", i),
                        available: names,
                    })
                }
            }
        })
    }
}

#[cfg(feature = "cpal-audio")]
pub use hw::{list_input_devices, open_device, resolve};
