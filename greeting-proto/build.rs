fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "../proto";

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[format!("{proto_root}/greeting/v1/greeting_service.proto")],
            &[proto_root],
        )?;
    Ok(())
}
