use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

pub struct TlsTestAssets {
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub server_cert: CertificateDer<'static>,
    pub server_key: Vec<u8>,
    pub server_name: String,
}

/// A CA and a `localhost` server certificate signed by it. The CA is
/// written to `dir/ca.pem`, the leaf to `dir/cert.pem` and its key to
/// `dir/key.pem`.
pub fn generate_tls_assets(dir: &Path) -> anyhow::Result<TlsTestAssets> {
    std::fs::create_dir_all(dir)?;

    let (ca_cert, ca_key) = build_ca()?;
    let (server_cert, server_key) = build_server(&ca_cert, &ca_key)?;

    let ca_path = dir.join("ca.pem");
    std::fs::write(&ca_path, ca_cert.pem())?;
    let cert_path = dir.join("cert.pem");
    std::fs::write(&cert_path, server_cert.pem())?;
    let key_path = dir.join("key.pem");
    std::fs::write(&key_path, server_key.serialize_pem())?;

    Ok(TlsTestAssets {
        ca_path,
        cert_path,
        key_path,
        server_cert: server_cert.der().clone(),
        server_key: server_key.serialize_der(),
        server_name: "localhost".to_string(),
    })
}

fn build_ca() -> anyhow::Result<(Certificate, KeyPair)> {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "service-commons-test-ca");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok((cert, key_pair))
}

fn build_server(ca_cert: &Certificate, ca_key: &KeyPair) -> anyhow::Result<(Certificate, KeyPair)> {
    let mut params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "localhost");
    params.is_ca = IsCa::NoCa;
    let key_pair = KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, ca_cert, ca_key)?;
    Ok((cert, key_pair))
}

/// Accept TLS handshakes on a local port until the runtime shuts down.
pub async fn spawn_handshake_listener(assets: &TlsTestAssets) -> anyhow::Result<SocketAddr> {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(assets.server_key.clone()));
    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(vec![assets.server_cert.clone()], key)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let _ = acceptor.accept(stream).await;
            });
        }
    });
    Ok(addr)
}
