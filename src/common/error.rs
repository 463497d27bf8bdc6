use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("packet too short for ipv4 header: {0} bytes")]
    TruncatedPacket(usize),
    #[error("invalid ipv4 header: {0}")]
    InvalidIpv4Header(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
