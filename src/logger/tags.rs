/// Module tags for log routing and per-module debug flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Database,
    Gateway,
    Engine,
    Strategy,
    Events,
    Webserver,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::Database => "DATABASE",
            LogTag::Gateway => "GATEWAY",
            LogTag::Engine => "ENGINE",
            LogTag::Strategy => "STRATEGY",
            LogTag::Events => "EVENTS",
            LogTag::Webserver => "WEBSERVER",
        }
    }

    /// The command-line switch enabling DEBUG output for this tag.
    pub fn debug_flag(&self) -> &'static str {
        match self {
            LogTag::System => "--debug-system",
            LogTag::Config => "--debug-config",
            LogTag::Database => "--debug-database",
            LogTag::Gateway => "--debug-gateway",
            LogTag::Engine => "--debug-engine",
            LogTag::Strategy => "--debug-strategy",
            LogTag::Events => "--debug-events",
            LogTag::Webserver => "--debug-webserver",
        }
    }
}
