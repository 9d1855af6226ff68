//! Generated gRPC wire types for the fleet control plane, plus the
//! conversions to and from `fleetops_types`.
//!
//! The service definitions mirror `fleetops_server`'s RPC surface almost
//! exactly; the one deliberate asymmetry is `Phase`, which only advertises
//! the three phases a client can ever observe or request (see
//! [`convert`]'s module docs).

pub mod convert;
pub mod error;

pub mod pb {
    tonic::include_proto!("fleetops.v1");
}

pub use error::{ConvertError, ConvertResult};
pub use convert::{machine_from_pb, machine_to_pb, operation_from_pb, operation_to_pb};
