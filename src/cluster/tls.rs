//! TLS 加密支持模块
//!
//! 提供节点间集群通信的双向 TLS：
//! - 从证书目录加载 `tls.crt` / `tls.key`
//! - 自信任模型：集群所有节点共享同一张证书，信任池只包含这张证书
//! - 监听端要求并校验客户端证书，拨号端出示同一张证书并校验服务端
//! - 自签集群证书生成（开发/测试环境，以及 `gencert` 工具）
//!
//! 拨号时使用证书中第一个非通配 DNS SAN 作为 TLS 服务器名，
//! 因为所有节点出示同一张证书，与实际拨号的主机名无关。

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// 证书文件名
pub const CERT_FILE: &str = "tls.crt";
/// 私钥文件名
pub const KEY_FILE: &str = "tls.key";

// ═══════════════════════════════════════════════════════════════════════════
// 错误类型
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Certificate generation failed: {0}")]
    CertGenError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TLS file not found: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("Certificate parsing failed: {0}")]
    ParseError(String),

    #[error("TLS configuration failed: {0}")]
    ConfigError(String),
}

// ═══════════════════════════════════════════════════════════════════════════
// 集群 TLS 材料
// ═══════════════════════════════════════════════════════════════════════════

/// 监听端与拨号端 TLS 配置（启动时加载一次，进程内不可变）
#[derive(Clone)]
pub struct ClusterTls {
    listen: Arc<ServerConfig>,
    dial: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl fmt::Debug for ClusterTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl ClusterTls {
    /// 从证书目录加载
    pub fn load(cert_dir: impl AsRef<Path>) -> Result<Self, TlsError> {
        let cert_dir = cert_dir.as_ref();
        let cert_pem = read_file(&cert_dir.join(CERT_FILE))?;
        let key_pem = read_file(&cert_dir.join(KEY_FILE))?;

        let tls = Self::from_pem(&cert_pem, &key_pem)?;
        log::info!(
            "Loaded cluster TLS material from {:?} (server name {:?})",
            cert_dir,
            tls.server_name
        );
        Ok(tls)
    }

    /// 由 PEM 格式的证书与私钥构建
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let certs = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<CertificateDer<'static>>, _>>()
            .map_err(|e| TlsError::ParseError(format!("invalid certificate PEM: {}", e)))?;
        let leaf = certs
            .first()
            .cloned()
            .ok_or_else(|| TlsError::ParseError("no certificate found".into()))?;

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| TlsError::ParseError(format!("invalid key PEM: {}", e)))?
            .ok_or_else(|| TlsError::ParseError("no private key found".into()))?;

        // 信任池只包含证书本身
        let mut roots = RootCertStore::empty();
        let (added, _) = roots.add_parsable_certificates(certs.iter().cloned());
        if added == 0 {
            return Err(TlsError::ParseError(
                "certificate cannot be used as trust anchor".into(),
            ));
        }
        let roots = Arc::new(roots);
        let provider: Arc<CryptoProvider> = Arc::new(rustls::crypto::ring::default_provider());

        let verifier = WebPkiClientVerifier::builder_with_provider(roots.clone(), provider.clone())
            .build()
            .map_err(|e| TlsError::ConfigError(e.to_string()))?;

        let listen = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::ConfigError(e.to_string()))?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs.clone(), key.clone_key())
            .map_err(|e| TlsError::ConfigError(format!("invalid key pair: {}", e)))?;

        let dial = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::ConfigError(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)
            .map_err(|e| TlsError::ConfigError(format!("invalid key pair: {}", e)))?;

        Ok(Self {
            listen: Arc::new(listen),
            dial: Arc::new(dial),
            server_name: server_name_of(&leaf)?,
        })
    }

    pub fn listen_config(&self) -> Arc<ServerConfig> {
        self.listen.clone()
    }

    pub fn dial_config(&self) -> Arc<ClientConfig> {
        self.dial.clone()
    }

    /// 拨号时校验的服务器名
    pub fn server_name(&self) -> ServerName<'static> {
        self.server_name.clone()
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.listen.clone())
    }

    pub fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.dial.clone())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => TlsError::MissingFile(path.to_path_buf()),
        _ => TlsError::IoError(e),
    })
}

/// 证书中第一个非通配 DNS SAN
fn server_name_of(cert: &CertificateDer<'_>) -> Result<ServerName<'static>, TlsError> {
    use x509_parser::prelude::*;

    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| TlsError::ParseError(e.to_string()))?;
    let san = parsed
        .subject_alternative_name()
        .map_err(|e| TlsError::ParseError(e.to_string()))?;

    let name = san
        .iter()
        .flat_map(|ext| ext.value.general_names.iter())
        .find_map(|name| match name {
            GeneralName::DNSName(dns) if !dns.starts_with("*.") => Some(dns.to_string()),
            _ => None,
        })
        .ok_or_else(|| {
            TlsError::ConfigError("certificate has no DNS subject alternative name".into())
        })?;

    ServerName::try_from(name).map_err(|e| TlsError::ConfigError(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════
// 证书生成器
// ═══════════════════════════════════════════════════════════════════════════

/// 集群共享证书生成器
///
/// 生成非 CA 的自签证书，同时带 ServerAuth/ClientAuth 用途，
/// 自身即可作为信任根。
#[derive(Debug, Clone)]
pub struct CertificateGenerator {
    /// 第一个名称同时作为 CN 与拨号服务器名
    dns_names: Vec<String>,
    /// 证书有效期（天）
    validity_days: u32,
}

impl CertificateGenerator {
    pub fn new(dns_names: Vec<String>) -> Self {
        Self {
            dns_names,
            validity_days: 365,
        }
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// 生成证书与私钥（PEM）
    pub fn generate(&self) -> Result<(String, String), TlsError> {
        let common_name = self
            .dns_names
            .first()
            .ok_or_else(|| TlsError::CertGenError("at least one DNS name is required".into()))?;

        let mut params = CertificateParams::new(self.dns_names.clone())
            .map_err(|e| TlsError::CertGenError(e.to_string()))?;

        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name.as_str());
        params.distinguished_name = dn;

        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
        params.not_after =
            params.not_before + time::Duration::days(self.validity_days as i64);

        let key_pair = KeyPair::generate().map_err(|e| TlsError::CertGenError(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| TlsError::CertGenError(e.to_string()))?;

        Ok((cert.pem(), key_pair.serialize_pem()))
    }

    /// 生成并写入 `<dir>/tls.crt` 与 `<dir>/tls.key`
    pub fn generate_and_save(&self, cert_dir: &Path) -> Result<(PathBuf, PathBuf), TlsError> {
        fs::create_dir_all(cert_dir)?;

        let (cert_pem, key_pem) = self.generate()?;
        let cert_path = cert_dir.join(CERT_FILE);
        let key_path = cert_dir.join(KEY_FILE);
        Self::write_pem(&cert_path, &cert_pem)?;
        Self::write_pem(&key_path, &key_pem)?;

        log::info!("Generated cluster certificate in {:?}", cert_dir);
        Ok((cert_path, key_path))
    }

    fn write_pem(path: &Path, content: &str) -> Result<(), TlsError> {
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        // 设置文件权限（仅 owner 可读）
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════
