//! Prints the CustomResourceDefinition manifests as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/hivelocitymachine.yaml`

use crds::HivelocityMachine;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = HivelocityMachine::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
