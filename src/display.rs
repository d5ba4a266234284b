//! Virtual display provisioning.
//!
//! A recording captures through a virtual display bound to the platform's
//! screen content. The provisioner owns at most one display handle at a
//! time: it creates on first use, resizes in place when the requested
//! dimensions change, and releases only when the session is destroyed.

use tracing::{debug, info};

use crate::error::DisplayError;

/// Nominal density for virtual displays. Capture surfaces are pixel-exact,
/// so the density is never used for scaling.
pub const VIRTUAL_DISPLAY_DPI: u32 = 1;

/// Handle to a provisioned virtual display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisplay {
    id: u64,
    name: String,
    width: u32,
    height: u32,
    dpi: u32,
    public: bool,
}

impl VirtualDisplay {
    /// Build a handle for a freshly created platform display. Backends call
    /// this from [`DisplayBackend::create`].
    pub fn new(id: u64, name: &str, width: u32, height: u32, dpi: u32, public: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            width,
            height,
            dpi,
            public,
        }
    }

    /// Platform identity of the handle. Stable across resizes.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Whether the display was created with public visibility.
    pub fn is_public(&self) -> bool {
        self.public
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}

/// Platform seam for virtual display management.
pub trait DisplayBackend: Send {
    /// Create a virtual display bound to the capture surface.
    fn create(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        dpi: u32,
        public: bool,
    ) -> Result<VirtualDisplay, DisplayError>;

    /// Resize an existing display in place. The handle keeps its identity.
    fn resize(
        &mut self,
        handle: &VirtualDisplay,
        width: u32,
        height: u32,
        dpi: u32,
    ) -> Result<(), DisplayError>;

    /// Release the platform handle.
    fn release(&mut self, handle: &VirtualDisplay);
}

/// Owns the single virtual display handle for a session.
pub struct DisplayProvisioner {
    backend: Box<dyn DisplayBackend>,
    name: String,
    current: Option<VirtualDisplay>,
}

impl DisplayProvisioner {
    pub fn new(backend: Box<dyn DisplayBackend>, name: String) -> Self {
        Self {
            backend,
            name,
            current: None,
        }
    }

    /// Get the display for the requested dimensions, creating it on first
    /// use and resizing in place when the dimensions differ from the
    /// current handle.
    pub fn provision(&mut self, width: u32, height: u32) -> Result<VirtualDisplay, DisplayError> {
        if let Some(handle) = self.current.as_mut() {
            if handle.width() != width || handle.height() != height {
                info!(
                    "Resizing virtual display '{}' from {}x{} to {}x{}",
                    handle.name(),
                    handle.width(),
                    handle.height(),
                    width,
                    height
                );
                self.backend
                    .resize(handle, width, height, VIRTUAL_DISPLAY_DPI)?;
                handle.set_size(width, height);
            } else {
                debug!(
                    "Reusing virtual display '{}' at {}x{}",
                    handle.name(),
                    width,
                    height
                );
            }
            return Ok(handle.clone());
        }

        info!(
            "Creating virtual display '{}' at {}x{}",
            self.name, width, height
        );
        let handle = self
            .backend
            .create(&self.name, width, height, VIRTUAL_DISPLAY_DPI, true)?;
        debug!(
            "Virtual display '{}' ready (id {}, dpi {}, public {})",
            handle.name(),
            handle.id(),
            handle.dpi(),
            handle.is_public()
        );
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Release the current handle. Idempotent; the next provision creates a
    /// fresh display.
    pub fn release(&mut self) {
        if let Some(handle) = self.current.take() {
            info!("Releasing virtual display '{}'", handle.name());
            self.backend.release(&handle);
        }
    }

    /// The currently held handle, if any.
    pub fn current(&self) -> Option<&VirtualDisplay> {
        self.current.as_ref()
    }
}

/// Display backend for hosts without a compositor integration. Hands out
/// handles with fresh identities and accepts resize/release unconditionally.
#[derive(Default)]
pub struct HeadlessDisplayBackend {
    next_id: u64,
}

impl DisplayBackend for HeadlessDisplayBackend {
    fn create(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        dpi: u32,
        public: bool,
    ) -> Result<VirtualDisplay, DisplayError> {
        if width == 0 || height == 0 {
            return Err(DisplayError::CreateFailed {
                reason: format!("invalid dimensions {}x{}", width, height),
            });
        }
        self.next_id += 1;
        debug!("Headless display {} created for '{}'", self.next_id, name);
        Ok(VirtualDisplay::new(
            self.next_id,
            name,
            width,
            height,
            dpi,
            public,
        ))
    }

    fn resize(
        &mut self,
        handle: &VirtualDisplay,
        width: u32,
        height: u32,
        _dpi: u32,
    ) -> Result<(), DisplayError> {
        if width == 0 || height == 0 {
            return Err(DisplayError::ResizeFailed {
                reason: format!("invalid dimensions {}x{}", width, height),
            });
        }
        debug!(
            "Headless display {} resized to {}x{}",
            handle.id(),
            width,
            height
        );
        Ok(())
    }

    fn release(&mut self, handle: &VirtualDisplay) {
        debug!("Headless display {} released", handle.id());
    }
}

/// Create the display backend for this host.
pub fn create_display_backend() -> Box<dyn DisplayBackend> {
    Box::new(HeadlessDisplayBackend::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct JournalingBackend {
        ops: Arc<Mutex<Vec<String>>>,
        next_id: u64,
    }

    impl JournalingBackend {
        fn new(ops: Arc<Mutex<Vec<String>>>) -> Self {
            Self { ops, next_id: 0 }
        }
    }

    impl DisplayBackend for JournalingBackend {
        fn create(
            &mut self,
            name: &str,
            width: u32,
            height: u32,
            dpi: u32,
            public: bool,
        ) -> Result<VirtualDisplay, DisplayError> {
            self.next_id += 1;
            self.ops
                .lock()
                .unwrap()
                .push(format!("create {}x{}", width, height));
            Ok(VirtualDisplay::new(
                self.next_id,
                name,
                width,
                height,
                dpi,
                public,
            ))
        }

        fn resize(
            &mut self,
            display: &VirtualDisplay,
            width: u32,
            height: u32,
            _dpi: u32,
        ) -> Result<(), DisplayError> {
            self.ops
                .lock()
                .unwrap()
                .push(format!("resize {} {}x{}", display.id(), width, height));
            Ok(())
        }

        fn release(&mut self, display: &VirtualDisplay) {
            self.ops
                .lock()
                .unwrap()
                .push(format!("release {}", display.id()));
        }
    }

    fn provisioner_with_journal() -> (DisplayProvisioner, Arc<Mutex<Vec<String>>>) {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let backend = JournalingBackend::new(ops.clone());
        (
            DisplayProvisioner::new(Box::new(backend), "test-display".to_string()),
            ops,
        )
    }

    #[test]
    fn test_first_provision_creates_public_display() {
        let (mut provisioner, ops) = provisioner_with_journal();

        let display = provisioner.provision(1920, 1080).unwrap();
        assert_eq!(display.width(), 1920);
        assert_eq!(display.height(), 1080);
        assert_eq!(display.dpi(), VIRTUAL_DISPLAY_DPI);
        assert!(display.is_public());
        assert_eq!(ops.lock().unwrap().as_slice(), ["create 1920x1080"]);
    }

    #[test]
    fn test_same_dimensions_reuse_handle_without_backend_calls() {
        let (mut provisioner, ops) = provisioner_with_journal();

        let first = provisioner.provision(1920, 1080).unwrap();
        let second = provisioner.provision(1920, 1080).unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(ops.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_dimension_change_resizes_in_place() {
        let (mut provisioner, ops) = provisioner_with_journal();

        let first = provisioner.provision(1920, 1080).unwrap();
        let resized = provisioner.provision(1280, 720).unwrap();

        // Same identity, new dimensions, no second create
        assert_eq!(first.id(), resized.id());
        assert_eq!(resized.width(), 1280);
        assert_eq!(resized.height(), 720);
        assert_eq!(
            ops.lock().unwrap().as_slice(),
            ["create 1920x1080", "resize 1 1280x720"]
        );
    }

    #[test]
    fn test_release_is_idempotent_and_next_provision_creates() {
        let (mut provisioner, ops) = provisioner_with_journal();

        provisioner.provision(1920, 1080).unwrap();
        provisioner.release();
        provisioner.release();
        assert!(provisioner.current().is_none());

        let fresh = provisioner.provision(1920, 1080).unwrap();
        assert_eq!(fresh.id(), 2);

        let journal = ops.lock().unwrap();
        assert_eq!(
            journal.as_slice(),
            ["create 1920x1080", "release 1", "create 1920x1080"]
        );
    }

    #[test]
    fn test_single_handle_at_a_time() {
        let (mut provisioner, ops) = provisioner_with_journal();

        provisioner.provision(800, 600).unwrap();
        provisioner.provision(1024, 768).unwrap();
        provisioner.provision(1024, 768).unwrap();

        let creates = ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.starts_with("create"))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn test_headless_backend_rejects_zero_dimensions() {
        let mut provisioner =
            DisplayProvisioner::new(create_display_backend(), "test-display".to_string());

        assert!(provisioner.provision(0, 1080).is_err());
        assert!(provisioner.current().is_none());

        // A held display survives a failed resize with its old dimensions.
        let display = provisioner.provision(1920, 1080).unwrap();
        assert!(provisioner.provision(1920, 0).is_err());
        assert_eq!(provisioner.current(), Some(&display));
    }
}
