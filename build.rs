fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Message types are hand-written prost structs in `transport::grpc::proto`,
    // only the service stubs are generated here.
    let cloud_event_service = tonic_build::manual::Service::builder()
        .name("CloudEventService")
        .package("spokesync.cloudevent.v1")
        .method(
            tonic_build::manual::Method::builder()
                .name("publish")
                .route_name("Publish")
                .input_type("crate::transport::grpc::proto::PublishRequest")
                .output_type("crate::transport::grpc::proto::PublishResponse")
                .codec_path("tonic::codec::ProstCodec")
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("subscribe")
                .route_name("Subscribe")
                .input_type("crate::transport::grpc::proto::SubscriptionRequest")
                .output_type("crate::transport::grpc::proto::CloudEvent")
                .codec_path("tonic::codec::ProstCodec")
                .server_streaming()
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[cloud_event_service]);

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
