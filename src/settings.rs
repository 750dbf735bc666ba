//! Register allocator settings.
//!
//! Settings are configured through a `Builder` using string names and values, the same way the
//! rest of the code generator is configured from the command line or from test files:
//!
//! ```ignore
//! use cranelift_linear_scan::settings::{self, Configurable};
//!
//! let mut b = settings::builder();
//! b.set("regalloc", "linear_scan")?;
//! b.enable("enable_verifier")?;
//! let flags = settings::Flags::new(b);
//! ```
//!
//! The frozen `Flags` are passed to `regalloc::create` when the allocation strategy is
//! instantiated.

use core::fmt;
use core::str;
use thiserror::Error;

/// Register allocation strategies.
///
/// Only `LinearScan` can be instantiated. `GraphColor` is still recognized so that old
/// configurations fail with a clear message instead of silently getting another allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Linear scan over live intervals in order of increasing start position.
    LinearScan,
    /// Iterated graph coloring. This allocator has been removed.
    GraphColor,
}

impl Strategy {
    /// Human readable name used in diagnostics.
    pub fn description(self) -> &'static str {
        match self {
            Self::LinearScan => "Linear scan",
            Self::GraphColor => "Graph coloring",
        }
    }
}

impl Default for Strategy {
    fn default() -> Self {
        Self::LinearScan
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Self::LinearScan => "linear_scan",
            Self::GraphColor => "graph_color",
        })
    }
}

impl str::FromStr for Strategy {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear_scan" => Ok(Self::LinearScan),
            "graph_color" => Ok(Self::GraphColor),
            _ => Err(()),
        }
    }
}

/// An error produced when changing a setting.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SetError {
    /// No setting by this name exists.
    #[error("No existing setting named '{0}'")]
    BadName(String),

    /// Type mismatch for setting (e.g., setting an enum setting as a bool).
    #[error("Trying to set a setting with the wrong type")]
    BadType,

    /// This is not a valid value for this setting.
    #[error("Unexpected value for a setting, expected {0}")]
    BadValue(String),
}

/// A result returned when changing a setting.
pub type SetResult<T> = Result<T, SetError>;

/// A string-based configurator for settings groups.
pub trait Configurable {
    /// Set the string value of any setting by name.
    ///
    /// This can set any type of setting whether it is numeric, boolean, or enumerated.
    fn set(&mut self, name: &str, value: &str) -> SetResult<()>;

    /// Enable a boolean setting or apply a preset.
    ///
    /// If the identified setting isn't a boolean or a preset, a `BadType` error is returned.
    fn enable(&mut self, name: &str) -> SetResult<()>;
}

/// Collect settings values before freezing them into `Flags`.
#[derive(Clone, Debug)]
pub struct Builder {
    regalloc: Strategy,
    enable_verifier: bool,
}

/// Create a settings builder with default values.
pub fn builder() -> Builder {
    Builder {
        regalloc: Strategy::default(),
        enable_verifier: true,
    }
}

fn parse_bool(value: &str) -> SetResult<bool> {
    match value {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(SetError::BadValue("bool".to_string())),
    }
}

impl Configurable for Builder {
    fn set(&mut self, name: &str, value: &str) -> SetResult<()> {
        match name {
            "regalloc" => {
                self.regalloc = value.parse().map_err(|()| {
                    SetError::BadValue("any among linear_scan, graph_color".to_string())
                })?;
            }
            "enable_verifier" => self.enable_verifier = parse_bool(value)?,
            _ => return Err(SetError::BadName(name.to_string())),
        }
        log::trace!("regalloc setting {name} = {value}");
        Ok(())
    }

    fn enable(&mut self, name: &str) -> SetResult<()> {
        match name {
            "enable_verifier" => {
                self.enable_verifier = true;
                Ok(())
            }
            "regalloc" => Err(SetError::BadType),
            _ => Err(SetError::BadName(name.to_string())),
        }
    }
}

/// Frozen register allocator settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flags {
    regalloc: Strategy,
    enable_verifier: bool,
}

impl Flags {
    /// Freeze the settings collected by `builder`.
    pub fn new(builder: Builder) -> Self {
        Self {
            regalloc: builder.regalloc,
            enable_verifier: builder.enable_verifier,
        }
    }

    /// The register allocation strategy to instantiate.
    pub fn regalloc(&self) -> Strategy {
        self.regalloc
    }

    /// Run the interference validator after every allocation.
    ///
    /// This makes allocation slower but catches strategy and liveness bugs. It is enabled by
    /// default.
    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new(builder())
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "[shared]")?;
        writeln!(f, "regalloc = \"{}\"", self.regalloc)?;
        writeln!(f, "enable_verifier = {}", self.enable_verifier)
    }
}
