//! Network rollout CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the network operator and
//! the node agent.

pub mod bgp_peering;
pub mod layer2_network_configuration;
pub mod network_config_revision;
pub mod node_network_config;
pub mod routing_table;
pub mod selector;
pub mod vrf_route_configuration;

pub use bgp_peering::*;
pub use layer2_network_configuration::*;
pub use network_config_revision::*;
pub use node_network_config::*;
pub use routing_table::*;
pub use selector::*;
pub use vrf_route_configuration::*;
