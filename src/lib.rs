//! Guntamatic Biostar to MQTT bridge.
//!
//! Polls the boiler controller's local CGI endpoints, merges the JSON status
//! document with the legacy text tables, and publishes the readings as
//! Home Assistant entities over MQTT.

pub mod biostar;
pub mod config;
pub mod mqtt;
