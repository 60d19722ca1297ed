use std::io::Result;

fn main() -> Result<()> {
    prost_build::compile_protos(&["perunwire.proto"], &["src/wire/"])?;
    Ok(())
}
