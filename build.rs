fn main() {
    prost_build::compile_protos(&["proto/dht.proto"], &["proto"])
        .expect("failed to compile dht.proto");
}
