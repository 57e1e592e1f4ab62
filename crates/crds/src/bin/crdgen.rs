//! Prints the CRD manifests as a multi-document YAML stream.

use crds::{
    BGPPeering, Layer2NetworkConfiguration, NetworkConfigRevision, NodeNetworkConfig,
    RoutingTable, VRFRouteConfiguration,
};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        Layer2NetworkConfiguration::crd(),
        VRFRouteConfiguration::crd(),
        BGPPeering::crd(),
        RoutingTable::crd(),
        NetworkConfigRevision::crd(),
        NodeNetworkConfig::crd(),
    ];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
