//! Port descriptors for the node system.
//!
//! Each node declares its ports (inputs/outputs) via static `PortDescriptor` arrays.
//! The pipeline uses these to resolve port names and validate connections.

use crate::image::PixelKind;

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }
}

/// Static descriptor for a node's port.
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub name: &'static str,
    pub direction: PortDirection,
    pub kind: PixelKind,
    /// Optional inputs may stay unbound; the engine rejects unbound required ones.
    pub optional: bool,
}

impl PortDescriptor {
    pub const fn input(name: &'static str, kind: PixelKind) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            kind,
            optional: false,
        }
    }

    pub const fn optional_input(name: &'static str, kind: PixelKind) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            kind,
            optional: true,
        }
    }

    pub const fn output(name: &'static str, kind: PixelKind) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            kind,
            optional: false,
        }
    }
}

/// Input ports of `ports`, in declaration order.
pub fn inputs(ports: &[PortDescriptor]) -> impl Iterator<Item = &PortDescriptor> {
    ports.iter().filter(|p| p.direction == PortDirection::Input)
}

/// Output ports of `ports`, in declaration order.
pub fn outputs(ports: &[PortDescriptor]) -> impl Iterator<Item = &PortDescriptor> {
    ports.iter().filter(|p| p.direction == PortDirection::Output)
}

/// Position of the named port among ports of the same direction.
pub fn position(ports: &[PortDescriptor], direction: PortDirection, name: &str) -> Option<usize> {
    ports
        .iter()
        .filter(|p| p.direction == direction)
        .position(|p| p.name == name)
}
