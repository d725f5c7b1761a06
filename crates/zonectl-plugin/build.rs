// SPDX-FileCopyrightText: 2026 Zonectl Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .btree_map(["."])
        .compile_protos_with_config(
            config,
            &["proto/zonectl/plugin/v1/plugin.proto"],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/zonectl/plugin/v1/plugin.proto");

    Ok(())
}
