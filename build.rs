//! Build script for zeebe-gateway-client

fn main() {
    // Compile the Zeebe gateway proto. Server stubs are generated too so the
    // integration tests can run an in-process gateway.
    println!("cargo:rerun-if-changed=proto/gateway_protocol/v1/gateway.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/gateway_protocol/v1/gateway.proto"], &["proto"])
        .expect("Failed to compile zeebe gateway proto");
}
