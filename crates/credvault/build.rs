fn main() -> Result<(), anyhow::Error> {
	let proto_files = ["proto/encryption.proto"];
	for file in &proto_files {
		println!("cargo:rerun-if-changed={file}");
	}
	let file_descriptors = protox::compile(proto_files, ["proto"])?;
	tonic_prost_build::configure()
		.build_server(true)
		.compile_fds(file_descriptors)?;
	Ok(())
}
