#![no_std]
#![no_main]

use defmt::*;
use embassy_executor::Spawner;
use embassy_rp::block::ImageDef;
use embassy_rp::gpio::{Input, Level, Output, OutputOpenDrain, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Delay, Duration, Instant, Timer};

use onebit_sensors::constants::{dht11 as dht11_const, timing};
use onebit_sensors::dht11::{Dht11, TemperatureUnit};
use onebit_sensors::serial_log::{self, SerialMessage, Severity};
use onebit_sensors::{log_info, DistanceUnit, EdgeEcho, Sonar, SonarConfig};

use {defmt_rtt as _, panic_probe as _};

#[unsafe(link_section = ".start_block")]
#[used]
pub static IMAGE_DEF: ImageDef = ImageDef::secure_exe();

// Program metadata for `picotool info`.
#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [embassy_rp::binary_info::EntryAddr; 4] = [
    embassy_rp::binary_info::rp_program_name!(c"onebit-sensors"),
    embassy_rp::binary_info::rp_program_description!(
        c"Ultrasonic distance tracking and DHT11 readings on RP Pico 2 W"
    ),
    embassy_rp::binary_info::rp_cargo_version!(),
    embassy_rp::binary_info::rp_program_build_attribute!(),
];

type BoardSonar = Sonar<CriticalSectionRawMutex, Output<'static>, EdgeEcho<Input<'static>>>;

static SONAR: BoardSonar = Sonar::new(SonarConfig::new());

/// Distance (cm) that counts as "something in front of the sensor"
const DETECTION_DISTANCE_CM: u32 = 20;

/// Distance (cm) polled from the main loop
const NEAR_DISTANCE_CM: u32 = 10;

fn on_detection_zone_crossed() {
    match SONAR.median_distance(DistanceUnit::Centimeters) {
        Some(cm) if cm <= DETECTION_DISTANCE_CM => log_info!("Object within {} cm", cm),
        _ => log_info!("Object left the {} cm zone", DETECTION_DISTANCE_CM),
    }
}

#[embassy_executor::task]
async fn sonar_task() {
    SONAR.run().await;
}

/// Forwards queued log lines to defmt
#[embassy_executor::task]
async fn log_drain_task() -> ! {
    let receiver = serial_log::get_serial_receiver();
    loop {
        match receiver.receive().await {
            SerialMessage::Text(text) => info!("{}", text),
            SerialMessage::Formatted(Severity::Info, line) => info!("{}", line.as_str()),
            SerialMessage::Formatted(Severity::Warn, line) => warn!("{}", line.as_str()),
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());
    info!("onebit-sensors starting");

    info!("Pin connections:");
    info!("  Ultrasonic trigger: GPIO 19");
    info!("  Ultrasonic echo: GPIO 18");
    info!("  DHT11 data: GPIO 17");

    unwrap!(spawner.spawn(log_drain_task()));

    // ===== ULTRASONIC SENSOR =====
    let trig = Output::new(p.PIN_19, Level::Low);
    let echo = EdgeEcho::new(Input::new(p.PIN_18, Pull::None));
    SONAR.initialize(trig, echo).await;
    if let Err(err) = SONAR.on_object_detected_within(
        DETECTION_DISTANCE_CM,
        DistanceUnit::Centimeters,
        on_detection_zone_crossed,
    ) {
        warn!("Could not register distance handler: {}", err);
    }
    unwrap!(spawner.spawn(sonar_task()));
    info!(
        "Sonar running, {} ms cycle",
        SONAR.config().cycle.as_millis()
    );

    match SONAR.measure_once(DistanceUnit::Centimeters).await {
        Ok(distance) => info!("First reading: {} cm", distance),
        Err(err) => info!("First reading: {}", err),
    }

    // ===== DHT11 =====
    let mut dht = Dht11::new(OutputOpenDrain::new(p.PIN_17, Level::High), Delay);
    let mut last_dht_read = Instant::now();
    serial_log::send_message("Sensors ready").await;

    loop {
        if SONAR
            .is_within_distance(NEAR_DISTANCE_CM, DistanceUnit::Centimeters)
            .await
        {
            log_info!("Closer than {} cm", NEAR_DISTANCE_CM);
        }

        if last_dht_read.elapsed() >= Duration::from_millis(dht11_const::MIN_READ_INTERVAL_MS) {
            last_dht_read = Instant::now();
            if let Ok(reading) = dht.read() {
                log_info!(
                    "DHT11: {}% RH, {} C / {} F",
                    reading.humidity,
                    reading.temperature,
                    reading.temperature_in(TemperatureUnit::Fahrenheit)
                );
            }
        }

        Timer::after(Duration::from_millis(timing::VISUAL_DELAY_MS)).await;
    }
}
