use crate::{Connection, ContextBuilder, ContextFlags, Error, VerifyFlags};

fn self_signed_pem(hostname: &str) -> (String, String) {
    let cert = rcgen::generate_simple_self_signed(vec![hostname.to_string()]).unwrap();
    (cert.cert.pem(), cert.key_pair.serialize_pem())
}

#[tokio::test]
async fn connect_rejects_empty_hostname() {
    let client_ctx = ContextBuilder::new(ContextFlags::LIB_INIT)
        .build()
        .unwrap();
    let (client_io, _server_io) = tokio::io::duplex(4096);
    let err = Connection::connect(client_io, client_ctx, "")
        .await
        .unwrap_err();
    assert_eq!(err, Error::Einval);
}

#[tokio::test]
async fn connect_rejects_oversized_hostname() {
    let client_ctx = ContextBuilder::new(ContextFlags::LIB_INIT)
        .build()
        .unwrap();
    let (client_io, _server_io) = tokio::io::duplex(4096);
    let long_name = "a".repeat(256);
    let err = Connection::connect(client_io, client_ctx, &long_name)
        .await
        .unwrap_err();
    assert_eq!(err, Error::Einval);
}

#[tokio::test]
async fn read_after_close_is_rejected() {
    let (cert_pem, key_pem) = self_signed_pem("localhost");

    let mut server_builder = ContextBuilder::new(ContextFlags::LIB_INIT);
    server_builder
        .set_cert(cert_pem.as_bytes())
        .unwrap()
        .set_private_key(key_pem.as_bytes())
        .unwrap();
    let server_ctx = server_builder.build().unwrap();

    let mut client_builder = ContextBuilder::new(ContextFlags::LIB_INIT);
    client_builder
        .set_verify_flags(VerifyFlags::PEER_CERT | VerifyFlags::PEER_IDENT)
        .add_trusted_certs(cert_pem.as_bytes())
        .unwrap();
    let client_ctx = client_builder.build().unwrap();

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_res, server_res) = tokio::join!(
        Connection::connect(client_io, client_ctx, "localhost"),
        Connection::accept(server_io, server_ctx),
    );
    let mut client = client_res.unwrap();
    let _server = server_res.unwrap();

    client.shutdown().await.unwrap();
    assert!(client.is_closing());

    let mut buf = [0u8; 8];
    let err = client.read(&mut buf).await.unwrap_err();
    assert_eq!(err, Error::Einval);
}
