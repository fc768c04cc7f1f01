fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(gen_proto)]
    {
        println!("cargo:warning=Config 'gen_proto' enabled: Running protobuf codegen");

        tonic_build::configure()
            .build_client(true)
            .build_server(true)
            .out_dir("src/proto")
            .include_file("mod.rs")
            .emit_rerun_if_changed(false)
            .compile_protos(&["proto/job_manager.proto"], &["proto/"])?;

        // Instruct cargo to rerun this build script if any of the proto files change
        println!("cargo:rerun-if-changed=proto");
    }
    #[cfg(not(gen_proto))]
    {
        println!("cargo:debug=Config 'gen_proto' not enabled: Skipping protobuf codegen");
    }

    Ok(())
}
