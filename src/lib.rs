#![no_std]
#![allow(async_fn_in_trait)]

//! `gateway_core`: the hardware-independent half of the USMART gateway
//! firmware. Everything here is plain `no_std` logic and capability traits;
//! the concrete ESP32 wiring lives in `src/main.rs`, the firmware binary.

extern crate alloc;

pub mod command;
pub mod config;
pub mod constants;
pub mod flags;
pub mod http;
pub mod modem;
pub mod network;
pub mod ota;
pub mod power;
pub mod queue;
pub mod rtc;
pub mod sensor;
pub mod sensors;
pub mod startup;
pub mod supervisor;
pub mod wifi;
