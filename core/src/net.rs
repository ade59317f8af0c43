/*
 * net.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Staffetta, a scriptable HTTP/2 client.
 *
 * Staffetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Staffetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Staffetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Transport establishment: TCP + TLS with ALPN `h2` (and the legacy
//! `h2-16` alias some servers still answer with).
//!
//! The server certificate is accepted unconditionally. This is a known,
//! deliberate weakness of the tool: it talks to development and test
//! servers with self-signed certificates.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::client::ClientConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use crate::error::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// ALPN identifiers we offer and accept.
const SUPPORTED_PROTOCOLS: [&[u8]; 2] = [b"h2", b"h2-16"];

/// Accepts any server certificate and signature.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA1,
            SignatureScheme::ECDSA_SHA1_Legacy,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

/// TLS client config for HTTP/2: no certificate verification, ALPN h2/h2-16.
fn h2_client_config() -> Arc<ClientConfig> {
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    config.alpn_protocols = SUPPORTED_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Arc::new(config)
}

/// TCP connect, TLS handshake, ALPN check. Fails unless the server
/// negotiated one of the HTTP/2 identifiers.
pub async fn connect(host: &str, port: u16) -> Result<TlsStream<TcpStream>, ClientError> {
    let addr = format!("{}:{}", host, port);
    let tcp = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| ClientError::Connect(format!("Failed to connect to {}: timed out", addr)))?
        .map_err(|e| ClientError::Connect(format!("Failed to connect to {}: {}", addr, e)))?;

    let host_static: &'static str = Box::leak(host.to_string().into_boxed_str());
    let server_name: ServerName<'static> = host_static
        .try_into()
        .map_err(|_| ClientError::Connect(format!("{}: invalid host name", host)))?;
    let connector = TlsConnector::from(h2_client_config());
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| ClientError::Connect(format!("Failed to connect to {}: {}", addr, e)))?;

    let negotiated = tls.get_ref().1.alpn_protocol();
    if !negotiated
        .map(|p| SUPPORTED_PROTOCOLS.contains(&p))
        .unwrap_or(false)
    {
        return Err(ClientError::Connect(
            "Server does not support HTTP/2 protocol.".into(),
        ));
    }
    Ok(tls)
}
