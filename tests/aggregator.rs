//! End-to-end aggregator behavior that does not require real serial
//! hardware: receiver capacity/uniqueness and NTRIP mount registration.

use gnss_aggregator::aggregator::Aggregator;
use ntrip::{ManagerConfig, MountDescriptor};
use gnss_aggregator::statistics::Statistics;
use receiver::ReceiverVariant;

fn mount(name: &str, priority: i64) -> MountDescriptor {
    MountDescriptor {
        host: "localhost".to_string(),
        port: 2101,
        mount: name.to_string(),
        username: "u".to_string(),
        password: "p".to_string(),
        priority,
        description: String::new(),
        enabled: true,
    }
}

#[test]
fn capacity_cap_rejects_the_third_receiver() {
    let aggregator = Aggregator::new(ManagerConfig::default(), Statistics::default());

    assert!(aggregator.add_receiver("a", ReceiverVariant::Ubx, "/dev/ttyACM0", 115200));
    assert!(aggregator.add_receiver("b", ReceiverVariant::Unicore, "/dev/ttyACM1", 115200));
    assert!(!aggregator.add_receiver("c", ReceiverVariant::Ubx, "/dev/ttyACM2", 115200));

    let status = aggregator.status();
    assert_eq!(status.receivers.len(), 2);
}

#[tokio::test]
async fn add_mount_lazily_builds_the_manager_and_accepts_later_additions() {
    let aggregator = Aggregator::new(ManagerConfig::default(), Statistics::default());

    let status = aggregator.status();
    assert!(status.ntrip.mounts.is_empty());

    aggregator.add_mount(mount("M1", 1));
    aggregator.add_mount(mount("M2", 0));

    let status = aggregator.status();
    assert_eq!(status.ntrip.mounts.len(), 2);
    assert!(status.ntrip.mounts.iter().any(|(d, _)| d.mount == "M1"));
    assert!(status.ntrip.mounts.iter().any(|(d, _)| d.mount == "M2"));
}
