use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::sync::Arc;

use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::config::Config;

/// TLS for the SQL console, when both a certificate and a key are configured.
pub fn console_tls(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (config.tls_cert.as_deref(), config.tls_key.as_deref()) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both INNKEEPER_TLS_CERT and INNKEEPER_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(open(cert_path)?))
        .collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {cert_path}"),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, format!("no private key found in {key_path}")))?;

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    server.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(server))))
}

fn open(path: &str) -> io::Result<File> {
    File::open(path).map_err(|e| io::Error::new(e.kind(), format!("{path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cert: Option<&str>, key: Option<&str>) -> Config {
        let mut cfg = Config::from_lookup(|_| None).unwrap();
        cfg.tls_cert = cert.map(String::from);
        cfg.tls_key = key.map(String::from);
        cfg
    }

    #[test]
    fn disabled_without_paths() {
        assert!(console_tls(&config(None, None)).unwrap().is_none());
    }

    #[test]
    fn half_configured_is_rejected() {
        let err = console_tls(&config(Some("cert.pem"), None)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(console_tls(&config(None, Some("key.pem"))).is_err());
    }

    #[test]
    fn missing_files_name_the_path() {
        let err = console_tls(&config(Some("/nonexistent/cert.pem"), Some("/nonexistent/key.pem")))
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/cert.pem"));
    }

    #[test]
    fn empty_certificate_file_is_rejected() {
        let dir = std::env::temp_dir().join("innkeeper_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("empty.pem");
        std::fs::write(&cert, "").unwrap();
        let cert = cert.to_string_lossy().into_owned();
        let err = console_tls(&config(Some(&cert), Some(&cert))).err().unwrap();
        assert!(err.to_string().contains("no certificates"));
    }
}
