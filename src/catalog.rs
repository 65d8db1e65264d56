//! Device catalog: the enumerated device snapshot plus the user's selection.
//!
//! Owned by the session controller and mutated only on its event loop.
//! Re-selecting is a pure state update and takes effect on the next start.

use tracing::warn;

use crate::engine::{DeviceDescriptor, DeviceKind};
use crate::error::DeviceError;

#[derive(Debug, Default)]
pub struct DeviceCatalog {
    devices: Vec<DeviceDescriptor>,
    selected_audio: Option<String>,
    selected_video: Option<String>,
    last_error: Option<String>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an enumeration result.
    ///
    /// On success the snapshot is replaced and the first device of each kind
    /// becomes the default selection, but only if no selection exists yet.
    /// On failure a prior non-empty selection is preserved (the catalog
    /// stays usable, flagged but non-throwing); with nothing selected the
    /// error is surfaced to the caller.
    pub fn apply_enumeration(
        &mut self,
        result: Result<Vec<DeviceDescriptor>, DeviceError>,
    ) -> Result<(), DeviceError> {
        match result {
            Ok(devices) => {
                if self.selected_audio.is_none() {
                    self.selected_audio = devices
                        .iter()
                        .find(|d| d.kind == DeviceKind::AudioInput)
                        .map(|d| d.id.clone());
                }
                if self.selected_video.is_none() {
                    self.selected_video = devices
                        .iter()
                        .find(|d| d.kind == DeviceKind::VideoInput)
                        .map(|d| d.id.clone());
                }
                self.devices = devices;
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                if self.selected_audio.is_some() || self.selected_video.is_some() {
                    warn!("device enumeration failed, keeping prior selection: {e}");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Select a device by id. Returns false if the id is not in the current
    /// snapshot.
    pub fn select(&mut self, id: &str) -> bool {
        match self.devices.iter().find(|d| d.id == id) {
            Some(device) => {
                match device.kind {
                    DeviceKind::AudioInput => self.selected_audio = Some(device.id.clone()),
                    DeviceKind::VideoInput => self.selected_video = Some(device.id.clone()),
                }
                true
            }
            None => false,
        }
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn selected_audio(&self) -> Option<&str> {
        self.selected_audio.as_deref()
    }

    pub fn selected_video(&self) -> Option<&str> {
        self.selected_video.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mic(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.into(),
            kind: DeviceKind::AudioInput,
            label: format!("Microphone {id}"),
        }
    }

    fn cam(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.into(),
            kind: DeviceKind::VideoInput,
            label: format!("Camera {id}"),
        }
    }

    #[test]
    fn defaults_to_first_device_of_each_kind() {
        let mut catalog = DeviceCatalog::new();
        catalog
            .apply_enumeration(Ok(vec![mic("mic-0"), mic("mic-1"), cam("cam-0")]))
            .unwrap();
        assert_eq!(catalog.selected_audio(), Some("mic-0"));
        assert_eq!(catalog.selected_video(), Some("cam-0"));
    }

    #[test]
    fn refresh_does_not_override_existing_selection() {
        let mut catalog = DeviceCatalog::new();
        catalog
            .apply_enumeration(Ok(vec![mic("mic-0"), mic("mic-1")]))
            .unwrap();
        assert!(catalog.select("mic-1"));

        catalog
            .apply_enumeration(Ok(vec![mic("mic-0"), mic("mic-1")]))
            .unwrap();
        assert_eq!(catalog.selected_audio(), Some("mic-1"));
    }

    #[test]
    fn select_unknown_id_is_rejected() {
        let mut catalog = DeviceCatalog::new();
        catalog.apply_enumeration(Ok(vec![mic("mic-0")])).unwrap();
        assert!(!catalog.select("mic-9"));
        assert_eq!(catalog.selected_audio(), Some("mic-0"));
    }

    #[test]
    fn failed_refresh_preserves_prior_selection() {
        let mut catalog = DeviceCatalog::new();
        catalog.apply_enumeration(Ok(vec![mic("mic-0")])).unwrap();

        let result = catalog.apply_enumeration(Err(DeviceError::NoDeviceFound));
        assert!(result.is_ok());
        assert_eq!(catalog.selected_audio(), Some("mic-0"));
        assert!(catalog.last_error().is_some());
    }

    #[test]
    fn failed_refresh_with_no_selection_surfaces_error() {
        let mut catalog = DeviceCatalog::new();
        let result = catalog.apply_enumeration(Err(DeviceError::NoDeviceFound));
        assert!(matches!(result, Err(DeviceError::NoDeviceFound)));
        // Still usable afterward.
        assert!(catalog.devices().is_empty());
        assert_eq!(catalog.selected_audio(), None);
    }
}
