//! Generated Zeebe gateway protocol types (tonic-build).

#![allow(clippy::all)]

tonic::include_proto!("gateway_protocol");
