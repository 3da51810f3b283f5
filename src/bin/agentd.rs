use clap::{App, Arg};
use firefleet::agent::UnitAgent;
use firefleet::config::FleetConfig;
use firefleet::control::SimulatedController;
use firefleet::hazard::{SimulatedClassifier, SimulatedThermalSource};
use firefleet::protocol::GeoPoint;
use tokio::net::TcpListener;

const DEFAULT_PORT: &str = "7600";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("agentd")
        .version("0.1.0")
        .author("Field Robotics Team")
        .about("On-board unit agent with a simulated flight backend")
        .arg(
            Arg::with_name("id")
                .short("i")
                .long("id")
                .value_name("UNIT_ID")
                .help("Unit identifier, e.g. scout-1")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port for controller connections")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("lat")
                .long("lat")
                .value_name("DEG")
                .help("Launch latitude")
                .takes_value(true)
                .default_value("37.7749"),
        )
        .arg(
            Arg::with_name("lon")
                .long("lon")
                .value_name("DEG")
                .help("Launch longitude")
                .takes_value(true)
                .default_value("-122.4194"),
        )
        .arg(
            Arg::with_name("ambient")
                .long("ambient")
                .value_name("CELSIUS")
                .help("Simulated ambient temperature")
                .takes_value(true)
                .default_value("16.0"),
        )
        .arg(
            Arg::with_name("hotspot-rate")
                .long("hotspot-rate")
                .value_name("PROB")
                .help("Per-frame probability of an injected hot cluster")
                .takes_value(true)
                .default_value("0.1"),
        )
        .get_matches();

    let unit_id = matches.value_of("id").unwrap_or_default().to_string();
    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let lat: f64 = matches.value_of("lat").unwrap_or("37.7749").parse()?;
    let lon: f64 = matches.value_of("lon").unwrap_or("-122.4194").parse()?;
    let ambient: f64 = matches.value_of("ambient").unwrap_or("16.0").parse()?;
    let hotspot: f64 = matches.value_of("hotspot-rate").unwrap_or("0.1").parse()?;

    let home = GeoPoint::new(lat, lon, 0.0);
    let agent = UnitAgent::new(
        unit_id.clone(),
        Box::new(SimulatedController::new(unit_id.clone(), home)),
        Box::new(SimulatedThermalSource {
            ambient_c: ambient,
            hotspot_probability: hotspot,
        }),
        Box::new(SimulatedClassifier),
        FleetConfig::default(),
    );

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    println!("🚁 Unit agent {} listening on port {}", unit_id, port);
    agent.run(listener).await?;
    Ok(())
}
