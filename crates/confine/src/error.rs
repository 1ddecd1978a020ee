use confine_common::policy::PolicyLevel;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnforcerError {
    #[error("enforcement is not supported on this OS")]
    NotSupported,

    #[error("container {0} is not registered")]
    UnknownContainer(u32),

    #[error("container {id} still has {processes} registered processes")]
    ContainerBusy { id: u32, processes: usize },

    #[error("path prefix `{path}` does not fit {max} bytes")]
    PathTooLong { path: String, max: usize },

    #[error("{0:?} containers have no rule tables")]
    NoRuleTable(PolicyLevel),

    #[error("rule set of {got} entries exceeds the table capacity of {max}")]
    TooManyRules { got: usize, max: u32 },

    #[cfg(target_os = "linux")]
    #[error("bpf error: {0}")]
    Bpf(#[from] aya::EbpfError),

    #[cfg(target_os = "linux")]
    #[error("map error: {0}")]
    Map(#[from] aya::maps::MapError),

    #[cfg(target_os = "linux")]
    #[error("program error: {0}")]
    Program(#[from] aya::programs::ProgramError),

    #[cfg(target_os = "linux")]
    #[error("btf error: {0}")]
    Btf(#[from] aya::BtfError),

    #[cfg(target_os = "linux")]
    #[error("logger error: {0}")]
    Log(#[from] aya_log::Error),

    #[cfg(target_os = "linux")]
    #[error("map '{name}' not found in the loaded object")]
    MapNotFound { name: &'static str },

    #[cfg(target_os = "linux")]
    #[error("program '{name}' not found in the loaded object")]
    ProgramNotFound { name: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
