//! Local sensor payload acquisition: BME280 (temperature/humidity/pressure),
//! SCD30 (CO2/temperature/humidity) and SDS011 (particulate matter), each
//! optional and gated by board feature flags at bring-up. There is no trait
//! indirection here — `Sensors` owns the concrete driver types directly and
//! drives each one's one-shot read-to-completion cycle itself, since the
//! set of sensors a gateway board carries is fixed at compile time, not
//! something callers substitute.

use embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Delay, Duration, Instant, Timer};
use heapless::FnvIndexMap;

use bme280_rs::{AsyncBme280, Configuration as Bme280Configuration, Oversampling, SensorMode};
use libscd::asynchronous::scd30::Scd30 as Scd30Driver;
use sds011_nostd_rs::{
    Config as Sds011Config, DeviceID as Sds011DeviceID, DeviceMode as Sds011DeviceMode,
    Sds011 as Sds011Driver,
};

use esp_hal::{i2c::master::I2c, uart::Uart, Async};

use crate::constants::{SCD30_INIT_RETRIES, SCD30_MEASUREMENT_INTERVAL_SECS, SENSOR_ACQUISITION_BUDGET_SECS};

type SharedI2c = I2cDevice<'static, NoopRawMutex, I2c<'static, Async>>;

const SCD30_AMBIENT_PRESSURE_MBAR: u16 = 1013;
const SCD30_INIT_RETRY_DELAY_MS: u64 = 5000;
const SCD30_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug)]
pub enum SensorError {
    InitFailure,
    MeasurementFailure,
    Bme280NoTemperatureData,
    Bme280NoHumidityData,
    Bme280NoPressureData,
}

#[derive(Default, Debug)]
pub struct SensorData {
    pub data: FnvIndexMap<&'static str, f32, 16>,
}

impl SensorData {
    pub fn add_measurement(&mut self, key: &'static str, value: f32) {
        self.data.insert(key, value).ok();
    }
}

pub struct Sensors {
    bme280: Option<AsyncBme280<SharedI2c, Delay>>,
    scd30: Option<Scd30Driver<SharedI2c, Delay>>,
    sds011: Option<Sds011Driver<Uart<'static, Async>>>,
}

impl Default for Sensors {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensors {
    pub fn new() -> Self {
        Self { bme280: None, scd30: None, sds011: None }
    }

    pub async fn new_bme280(&mut self, i2c: SharedI2c) -> Result<(), SensorError> {
        let mut sensor = AsyncBme280::new(i2c, Delay);
        sensor.init().await.map_err(|_| SensorError::InitFailure)?;
        sensor
            .set_sampling_configuration(
                Bme280Configuration::default()
                    .with_temperature_oversampling(Oversampling::Oversample1)
                    .with_pressure_oversampling(Oversampling::Oversample1)
                    .with_humidity_oversampling(Oversampling::Oversample1)
                    .with_sensor_mode(SensorMode::Normal),
            )
            .await
            .map_err(|_| SensorError::InitFailure)?;
        self.bme280 = Some(sensor);
        Ok(())
    }

    /// Brings the SCD30 out of whatever continuous-measurement state it
    /// booted into and arms it at the gateway's fixed interval. Retries
    /// `stop_continuous_measurement` a bounded number of times instead of
    /// looping forever, so a missing or unresponsive sensor fails bring-up
    /// rather than stalling the rest of startup.
    pub async fn new_scd30(&mut self, i2c: SharedI2c) -> Result<(), SensorError> {
        let mut sensor = Scd30Driver::new(i2c, Delay);
        Timer::after(Duration::from_millis(1000)).await;

        let mut attempt = 0;
        loop {
            match sensor.stop_continuous_measurement().await {
                Ok(_) => break,
                Err(_) if attempt < SCD30_INIT_RETRIES => {
                    attempt += 1;
                    Timer::after(Duration::from_millis(SCD30_INIT_RETRY_DELAY_MS)).await;
                }
                Err(_) => return Err(SensorError::InitFailure),
            }
        }

        Timer::after(Duration::from_millis(1000)).await;
        sensor
            .set_measurement_interval(SCD30_MEASUREMENT_INTERVAL_SECS)
            .await
            .map_err(|_| SensorError::InitFailure)?;

        Timer::after(Duration::from_millis(100)).await;
        sensor
            .start_continuous_measurement(SCD30_AMBIENT_PRESSURE_MBAR)
            .await
            .map_err(|_| SensorError::InitFailure)?;

        self.scd30 = Some(sensor);
        Ok(())
    }

    pub async fn new_sds011(&mut self, uart: Uart<'static, Async>) -> Result<(), SensorError> {
        let mut sensor = Sds011Driver::new(
            uart,
            Sds011Config {
                id: Sds011DeviceID { id1: 0xFF, id2: 0xFF },
                mode: Sds011DeviceMode::Active,
            },
        );
        sensor.init().await.map_err(|_| SensorError::InitFailure)?;
        self.sds011 = Some(sensor);
        Ok(())
    }

    pub async fn measure(&mut self) -> Result<SensorData, SensorError> {
        let mut data = SensorData::default();

        if let Some(sensor) = self.bme280.as_mut() {
            let sample = sensor.read_sample().await.map_err(|_| SensorError::MeasurementFailure)?;
            data.add_measurement("temperature", sample.temperature.ok_or(SensorError::Bme280NoTemperatureData)?);
            data.add_measurement("humidity", sample.humidity.ok_or(SensorError::Bme280NoHumidityData)?);
            data.add_measurement("pressure", sample.pressure.ok_or(SensorError::Bme280NoPressureData)?);
        }

        if let Some(sensor) = self.scd30.as_mut() {
            let deadline = Instant::now() + Duration::from_secs(SENSOR_ACQUISITION_BUDGET_SECS as u64);
            loop {
                match sensor.data_ready().await {
                    Ok(true) => break,
                    Ok(false) if Instant::now() < deadline => {
                        Timer::after(Duration::from_millis(SCD30_POLL_INTERVAL_MS)).await;
                    }
                    Ok(false) => return Err(SensorError::MeasurementFailure),
                    Err(_) => return Err(SensorError::MeasurementFailure),
                }
            }
            let sample = sensor.measurement().await.map_err(|_| SensorError::MeasurementFailure)?;
            data.add_measurement("temperature", sample.temperature);
            data.add_measurement("humidity", sample.humidity);
            data.add_measurement("co2", sample.co2 as f32);
        }

        if let Some(sensor) = self.sds011.as_mut() {
            let sample = sensor.read_sample().await.map_err(|_| SensorError::MeasurementFailure)?;
            data.add_measurement("air_quality_pm2_5", sample.pm2_5);
            data.add_measurement("air_quality_pm10", sample.pm10);
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sensors_configured_yields_empty_data() {
        let data = SensorData::default();
        assert!(data.data.is_empty());
    }

    #[test]
    fn add_measurement_is_retrievable() {
        let mut data = SensorData::default();
        data.add_measurement("co2", 412.5);
        assert_eq!(data.data.get("co2"), Some(&412.5));
    }
}
