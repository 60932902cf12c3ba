//! Demo daemon: publishes a status blob at a fixed cadence and echoes
//! every command it drains from the ring.
//!
//! ```bash
//! cargo run --example daemon -- my_channel
//! ```

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use venom_channel::{ChannelConfig, DaemonChannel, SLOT_PAYLOAD};

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "venom_demo".to_string());

    let daemon = match DaemonChannel::create(&name, ChannelConfig::default()) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("failed to create channel '{name}': {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("channel '{name}' up, publishing at 50 Hz (Ctrl+C to quit)");

    let started = Instant::now();
    let mut tick = 0u64;
    let mut commands = 0u64;
    let mut cmd_buf = [0u8; SLOT_PAYLOAD];

    loop {
        // State payload: tick counter, uptime, wall clock, command count.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let state = format!(
            "tick={tick} uptime_ms={} unix={now} commands={commands}",
            started.elapsed().as_millis()
        );
        daemon.write_data(state.as_bytes());
        tick += 1;

        while let Some((client_id, len)) = daemon.try_recv_command(&mut cmd_buf) {
            commands += 1;
            let cmd = String::from_utf8_lossy(&cmd_buf[..len]);
            tracing::info!("client {client_id}: {cmd}");
            if cmd.as_ref() == "quit" {
                tracing::info!("shutdown requested after {commands} commands");
                return;
            }
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}
