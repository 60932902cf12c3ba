//! Demo shell: polls the daemon's status blob and optionally submits a
//! command.
//!
//! ```bash
//! cargo run --example shell -- my_channel            # read the state once
//! cargo run --example shell -- my_channel "quit"     # send a command too
//! ```

use std::time::Duration;
use venom_channel::ShellChannel;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "venom_demo".to_string());
    let command = args.next();

    let shell = match ShellChannel::connect(&name) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to attach to channel '{name}': {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("attached to '{name}' as client {}", shell.client_id());

    let mut buf = vec![0u8; shell.data_size()];
    for _ in 0..5 {
        let n = shell.read_data(&mut buf);
        if n > 0 {
            println!("{}", String::from_utf8_lossy(&buf[..n]));
        } else {
            println!("(no state published yet)");
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    if let Some(cmd) = command {
        if shell.try_send_command(cmd.as_bytes()) {
            tracing::info!("command sent: {cmd}");
        } else {
            tracing::warn!("command rejected (ring full or message too large)");
        }
    }
}
