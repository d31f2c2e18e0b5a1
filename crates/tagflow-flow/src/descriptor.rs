/// Direction of a single port on a node descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone)]
pub struct NodePort {
    pub name: String,
    pub direction: PortDirection,
    /// Only meaningful for input ports: the compiler refuses to start the flow if no wire
    /// targets a required input.
    pub required: bool,
}

impl NodePort {
    pub fn input(name: &str, required: bool) -> Self {
        Self { name: name.to_string(), direction: PortDirection::Input, required }
    }

    pub fn output(name: &str) -> Self {
        Self { name: name.to_string(), direction: PortDirection::Output, required: false }
    }
}

/// Describes one node type: its type tag, its ports, and whether it can be a flow's entry point.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub type_tag: String,
    pub ports: Vec<NodePort>,
    pub is_trigger: bool,
}

impl NodeDescriptor {
    pub fn new(type_tag: &str, is_trigger: bool, ports: Vec<NodePort>) -> Self {
        Self { type_tag: type_tag.to_string(), ports, is_trigger }
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.ports.iter().any(|p| p.name == name)
    }

    pub fn output_ports(&self) -> impl Iterator<Item = &NodePort> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Output)
    }

    pub fn input_ports(&self) -> impl Iterator<Item = &NodePort> {
        self.ports.iter().filter(|p| p.direction == PortDirection::Input)
    }
}
