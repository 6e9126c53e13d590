/// Generic mDNS service type most Shelly devices announce their web UI under
pub const HTTP_SERVICE_TYPE: &str = "_http._tcp.local.";

/// Vendor-specific mDNS service type announced by newer Shelly firmware
pub const SHELLY_SERVICE_TYPE: &str = "_shelly._tcp.local.";

/// TXT record keys advertised by Shelly devices
pub const TXT_GENERATION: &str = "gen";
pub const TXT_VERSION: &str = "ver";

/// Lowercased instance-name prefixes per device family
pub const PREFIX_PLUG: &str = "shellyplug";
pub const PREFIX_PLUS: &str = "shellyplus";
pub const PREFIX_PRO: &str = "shellypro";
pub const PREFIX_EM3: &str = "shellyem3";

/// Device identity document path
pub const SHELLY_INFO_PATH: &str = "/shelly";

/// Port assumed for hosts configured without one
pub const DEFAULT_PORT: u16 = 80;
