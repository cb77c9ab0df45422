//! Exercises end-to-end mount failover: an unreachable primary mount loses
//! out to a reachable secondary once its failure count crosses the
//! configured threshold.

use std::{sync::Arc, time::Duration};

use ntrip::{ManagerConfig, MountDescriptor, MountManager};
use tokio::{net::TcpListener, time::sleep};

fn descriptor(host: &str, port: u16, mount: &str, priority: i64) -> MountDescriptor {
    MountDescriptor {
        host: host.to_string(),
        port,
        mount: mount.to_string(),
        username: "user".to_string(),
        password: "pass".to_string(),
        priority,
        description: String::new(),
        enabled: true,
    }
}

/// A minimal fake caster: accepts one connection, replies `ICY 200 OK`, then
/// keeps the socket open without sending RTCM data.
async fn spawn_fake_caster() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(b"ICY 200 OK\r\n\r\n").await;
                // keep the connection open; no RTCM frames follow.
                let mut sink = [0u8; 64];
                loop {
                    match socket.read(&mut sink).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                }
            });
        }
    });

    port
}

/// An unreachable address: bind then immediately drop the listener so the
/// port refuses subsequent connections.
async fn unreachable_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn primary_failure_hands_off_to_secondary() {
    let bad_port = unreachable_port().await;
    let good_port = spawn_fake_caster().await;

    let manager = Arc::new(MountManager::new(
        vec![
            descriptor("127.0.0.1", bad_port, "M1", 1),
            descriptor("127.0.0.1", good_port, "M2", 2),
        ],
        ManagerConfig {
            max_consecutive_failures: 1,
            retry_delay: Duration::from_secs(300),
            health_check_interval: Duration::from_millis(50),
            data_timeout: Duration::from_secs(300),
        },
        |_frame| {},
    ));

    manager.start().await;
    sleep(Duration::from_millis(300)).await;

    let statuses = manager.statuses();
    let m1 = statuses.iter().find(|(d, _)| d.mount == "M1").unwrap();
    let m2 = statuses.iter().find(|(d, _)| d.mount == "M2").unwrap();

    assert!(m1.1.consecutive_failures >= 1, "primary should have recorded a failure");
    assert!(m2.1.connected, "secondary should be the active connection");

    manager.stop().await;
}
