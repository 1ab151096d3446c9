pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geojson;
pub mod parser;
pub mod push;
pub mod server;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
