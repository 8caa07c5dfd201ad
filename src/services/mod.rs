//! Diagnostic services behind the HTTP routes.

pub mod capture;
pub mod external_ip;
pub mod ping;
pub mod runner;
pub mod traffic;

pub use capture::CaptureInvoker;
pub use external_ip::ExternalIpService;
pub use ping::ReachabilityProbe;
pub use traffic::InterfaceStatsTracker;
