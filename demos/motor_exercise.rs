// Motor exercise: connect, push settings, run a timed move and compare the
// measured duration against the kinematics prediction.
//
// Usage: cargo run --example motor_exercise -- --host 192.168.33.1
//
// The controller moves real hardware; make sure the axis is free to rotate
// before running this.

use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mdrive_tcp_driver::config::MotorSettings;
use mdrive_tcp_driver::motor::MotorDriver;

#[derive(Parser)]
#[command(about = "Run a timed test move against an MDrive controller")]
struct Args {
    /// Controller address
    #[arg(long)]
    host: String,

    /// Controller command port
    #[arg(long, default_value_t = 503)]
    port: u16,

    /// Move size in degrees
    #[arg(long, default_value_t = 90.0)]
    angle: f64,

    /// JSON file with motor settings overrides
    #[arg(long)]
    settings: Option<std::path::PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => MotorSettings::default(),
    };

    let mut motor = MotorDriver::new(&args.host, args.port);
    motor.connect()?;

    if !motor.initialize_settings(&settings)? {
        eprintln!("Controller did not confirm every setting; aborting");
        std::process::exit(1);
    }

    let predicted_ms = motor.move_duration_ms(args.angle)?;
    info!("Predicted move time: {:.0} ms", predicted_ms);

    let started = Instant::now();
    let ok = motor.move_angle_relative(args.angle, Duration::from_millis(10_000))?;
    let measured = started.elapsed();

    info!(
        "Move of {} degrees: ok={}, measured {} ms",
        args.angle,
        ok,
        measured.as_millis()
    );

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
