pub(crate) use crate::{
    Credentials,
    brand::CliSession,
    parser::{LabelledHop, Neighbor, OutputParser, Resolution, Signal, SwitchportMode},
};

pub(crate) use tracing::{debug, trace, warn};

pub(crate) use std::net::IpAddr;
