use crate::{ContextBuilder, ContextFlags, VerifyFlags};

fn self_signed_pem(hostname: &str) -> (String, String) {
    let cert = rcgen::generate_simple_self_signed(vec![hostname.to_string()]).unwrap();
    (cert.cert.pem(), cert.key_pair.serialize_pem())
}

#[test]
fn peer_ident_without_peer_cert_is_rejected() {
    let mut builder = ContextBuilder::new(ContextFlags::NONE);
    builder.set_verify_flags(VerifyFlags::PEER_IDENT);
    assert!(builder.build().is_err());
}

#[test]
fn peer_cert_and_peer_ident_together_is_accepted() {
    let mut builder = ContextBuilder::new(ContextFlags::NONE);
    builder.set_verify_flags(VerifyFlags::PEER_CERT | VerifyFlags::PEER_IDENT);
    assert!(builder.build().is_ok());
}

#[test]
fn cert_without_matching_key_is_rejected() {
    let (cert_pem, _key_pem) = self_signed_pem("localhost");
    let mut builder = ContextBuilder::new(ContextFlags::NONE);
    builder.set_cert(cert_pem.as_bytes()).unwrap();
    assert!(builder.build().is_err());
}

#[test]
fn server_config_requires_identity() {
    let builder = ContextBuilder::new(ContextFlags::NONE);
    let ctx = builder.build().unwrap();
    assert!(ctx.server_config().is_err());
}

#[test]
fn client_and_server_engines_build_from_valid_context() {
    let (cert_pem, key_pem) = self_signed_pem("localhost");

    let mut server_builder = ContextBuilder::new(ContextFlags::LIB_INIT);
    server_builder
        .set_cert(cert_pem.as_bytes())
        .unwrap()
        .set_private_key(key_pem.as_bytes())
        .unwrap();
    let server_ctx = server_builder.build().unwrap();
    assert!(crate::TlsEngine::server(&server_ctx).is_ok());

    let mut client_builder = ContextBuilder::new(ContextFlags::NONE);
    client_builder
        .set_verify_flags(VerifyFlags::PEER_CERT | VerifyFlags::PEER_IDENT)
        .add_trusted_certs(cert_pem.as_bytes())
        .unwrap();
    let client_ctx = client_builder.build().unwrap();
    assert!(crate::TlsEngine::client(&client_ctx, "localhost").is_ok());
}
