pub mod desktop;
pub mod types;

pub use desktop::DesktopEntryResolver;
pub use types::{LabelResolver, UsageService};

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::X11UsageService as NativeUsageService;

#[cfg(not(target_os = "linux"))]
pub use unsupported::UnsupportedUsageService as NativeUsageService;

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::UsageService;
    use crate::error::UsageError;
    use crate::models::UsageRecord;
    use log::warn;

    /// No usage backend on this platform; behaves like a service whose access was never granted.
    #[derive(Default)]
    pub struct UnsupportedUsageService;

    impl UnsupportedUsageService {
        pub fn new() -> Self {
            Self
        }
    }

    impl UsageService for UnsupportedUsageService {
        fn query_usage(&self, _begin: i64, _end: i64) -> Result<Vec<UsageRecord>, UsageError> {
            Err(UsageError::PermissionDenied)
        }

        fn has_permission(&self) -> bool {
            false
        }

        fn request_permission(&self) {
            warn!("Usage access is not available on this platform");
        }
    }
}
