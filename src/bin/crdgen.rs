//! CRD YAML Generator
//!
//! This binary generates Kubernetes CRD manifests for the custom resources
//! owned by the volume-backup-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use volume_backup_operator::crd::generate_crds;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
