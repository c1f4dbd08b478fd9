//! Adapter implementations: the outer ring of the hexagonal architecture.
//!
//! | Adapter        | Port / role                 | Platform                 |
//! |----------------|-----------------------------|--------------------------|
//! | `broker_link`  | `Connector` + `Transport`   | TCP, mbedTLS on espidf   |
//! | `device_id`    | MQTT client id from MAC     | eFuse on espidf, sim MAC |
//! | `log_display`  | `DisplayPort`               | serial log               |
//! | `wifi`         | station join at boot        | BlockingWifi on espidf   |
//!
//! Every adapter compiles on the host through its simulation path.

pub mod broker_link;
pub mod device_id;
pub mod log_display;
pub mod wifi;
