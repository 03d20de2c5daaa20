// Homing demo: connect, push default settings, home to the index mark.
//
// Usage: cargo run --example homing -- --host 192.168.33.1

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mdrive_tcp_driver::config::MotorSettings;
use mdrive_tcp_driver::motor::MotorDriver;

#[derive(Parser)]
#[command(about = "Home an MDrive motor to its index mark")]
struct Args {
    /// Controller address
    #[arg(long)]
    host: String,

    /// Controller command port
    #[arg(long, default_value_t = 503)]
    port: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let mut motor = MotorDriver::new(&args.host, args.port);
    motor.connect()?;
    motor.initialize_settings(&MotorSettings::default())?;

    if motor.home_to_index()? {
        info!("Homed; motor parked at position 0");
        Ok(())
    } else {
        eprintln!("Homing failed; motor position reference is unset");
        std::process::exit(1);
    }
}
