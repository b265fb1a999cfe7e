use std::error::Error;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn Error>> {
    let protoc_path =
        protoc_bin_vendored::protoc_bin_path().expect("failed to get vendored protoc binary");
    unsafe {
        std::env::set_var("PROTOC", protoc_path);
    }

    // The vendored include path provides the well-known types
    // (google/protobuf/timestamp.proto).
    let includes = [
        PathBuf::from("proto"),
        protoc_bin_vendored::include_path().expect("failed to get vendored protoc includes"),
    ];

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/telejob/v1/telejob.proto"], &includes)?;
    Ok(())
}
