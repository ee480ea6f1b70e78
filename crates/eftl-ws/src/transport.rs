//! `tokio-tungstenite` implementation of [`eftl_core::transport::Transport`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use eftl_core::error::TransportError;
use eftl_core::options::{ConnectionOptions, Endpoint};
use eftl_core::protocol::SUBPROTOCOL;
use eftl_core::transport::{Transport, TransportConnector};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct WsTransport {
    stream: WsStream,
    close_code: Option<u16>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.to_string())),
                Ok(WsMessage::Close(frame)) => {
                    self.close_code = frame.as_ref().map(|f| u16::from(f.code));
                    return None;
                }
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
                Ok(WsMessage::Binary(_)) | Ok(WsMessage::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::SendFailed(e.to_string()))),
            }
        }
    }

    fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    async fn close(&mut self) {
        let _ = self
            .stream
            .close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }))
            .await;
        self.close_code.get_or_insert(1000);
    }
}

/// Opens eFTL connections over `tokio-tungstenite`, applying TLS trust
/// options per [`ConnectionOptions`].
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ConnectionOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", SUBPROTOCOL.parse().unwrap());

        let connector = if endpoint.is_secure() {
            Some(Connector::Rustls(Arc::new(build_tls_config(options)?)))
        } else {
            None
        };

        let (stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        Ok(Box::new(WsTransport { stream, close_code: None }))
    }
}

fn build_tls_config(options: &ConnectionOptions) -> Result<rustls::ClientConfig, TransportError> {
    let builder = rustls::ClientConfig::builder();

    if options.trust_all {
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(trust_all::NoVerifier))
            .with_no_client_auth());
    }

    let mut roots = rustls::RootCertStore::empty();
    if let Some(path) = &options.trust_store {
        let pem = std::fs::read(path)
            .map_err(|e| TransportError::ConnectFailed(format!("reading trust store {path:?}: {e}")))?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| TransportError::ConnectFailed(format!("parsing trust store: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| TransportError::ConnectFailed(format!("adding trust store cert: {e}")))?;
        }
    } else {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

/// A certificate verifier that accepts everything, for `trust_all` (local
/// development against a server with a self-signed certificate).
mod trust_all {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub(super) struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
                SignatureScheme::RSA_PSS_SHA256,
            ]
        }
    }
}
