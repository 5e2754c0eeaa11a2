//! TLS 材料加载：把 CA / 证书 / 私钥文件转换为 `rustls` 配置。
//!
//! # 设计动机（Why）
//! - 客户端与监听端的 TLS 参数都以文件路径给出（或直接给出预构建的 `rustls::ClientConfig`），
//!   本模块集中完成 PEM 解析与配置构造，传输构建器只接收最终的 `Arc<…Config>`；
//! - 加密 provider 显式选择 `ring`，通过 `builder_with_provider` 注入，避免依赖进程级默认 provider。
//!
//! # 契约（What）
//! - [`TlsClientMaterial::client_config`]：预构建上下文优先；否则仅当提供 `cafile` 时启用 TLS，
//!   `certfile` 单独出现不会启用 TLS；
//! - [`TlsServerMaterial::server_config`]：服务端只认证自身，不校验客户端证书；
//! - 所有读取/解析失败均返回 [`TransportError::TlsMaterial`]，携带出错文件路径。

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{ClientConfig, RootCertStore, ServerConfig, crypto::CryptoProvider};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};

use crate::{
    Result, TransportError,
    error::{TLS_CONFIG, map_rustls_error, tls_material_error},
};

/// 客户端 TLS 材料。
#[derive(Clone, Debug, Default)]
pub struct TlsClientMaterial {
    /// 用于校验服务端证书的 CA 证书（PEM）。
    pub cafile: Option<PathBuf>,
    /// 客户端证书链（PEM），用于双向认证。
    pub certfile: Option<PathBuf>,
    /// 客户端私钥（PEM）；缺省时从 `certfile` 中读取。
    pub keyfile: Option<PathBuf>,
    /// 预构建的 TLS 上下文，存在时忽略上面三个文件。
    pub context: Option<Arc<ClientConfig>>,
}

impl TlsClientMaterial {
    /// 是否会为 TCP 端点启用 TLS。
    pub fn engages_tls(&self) -> bool {
        self.cafile.is_some() || self.context.is_some()
    }

    /// 是否提供了任何 TLS 相关参数。
    pub fn is_supplied(&self) -> bool {
        self.engages_tls() || self.certfile.is_some() || self.keyfile.is_some()
    }

    /// 构造客户端配置；未启用 TLS 时返回 `None`。
    pub fn client_config(&self) -> Result<Option<Arc<ClientConfig>>> {
        if let Some(context) = &self.context {
            return Ok(Some(Arc::clone(context)));
        }
        let Some(cafile) = &self.cafile else {
            return Ok(None);
        };

        let roots = load_root_store(cafile)?;
        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|err| map_rustls_error(TLS_CONFIG, err))?
            .with_root_certificates(roots);

        let config = match &self.certfile {
            Some(certfile) => {
                let chain = load_certificates(certfile)?;
                let key = load_private_key(self.keyfile.as_deref().unwrap_or(certfile))?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|err| map_rustls_error(TLS_CONFIG, err))?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(Some(Arc::new(config)))
    }
}

/// 服务端 TLS 材料。
#[derive(Clone, Debug)]
pub struct TlsServerMaterial {
    /// 证书链（PEM）；未指定 `keyfile` 时也必须包含私钥。
    pub certfile: PathBuf,
    /// 私钥（PEM）。
    pub keyfile: Option<PathBuf>,
}

impl TlsServerMaterial {
    /// 以单个 PEM 文件（证书 + 私钥）构造。
    pub fn new(certfile: impl Into<PathBuf>) -> Self {
        Self {
            certfile: certfile.into(),
            keyfile: None,
        }
    }

    /// 构造服务端配置。
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let chain = load_certificates(&self.certfile)?;
        let key = load_private_key(self.keyfile.as_deref().unwrap_or(&self.certfile))?;
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|err| map_rustls_error(TLS_CONFIG, err))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|err| map_rustls_error(TLS_CONFIG, err))?;
        Ok(Arc::new(config))
    }
}

/// 读取 PEM 文件中的全部证书。
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|err| tls_material_error(path, err))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| tls_material_error(path, err))?;
    if certs.is_empty() {
        return Err(tls_material_error(path, "no certificate found"));
    }
    Ok(certs)
}

/// 读取 PEM 文件中的第一把私钥（PKCS#8 / PKCS#1 / SEC1）。
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_file(path).map_err(|err| tls_material_error(path, err))
}

/// 以 PEM 文件中的证书构造信任根。
pub fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots
            .add(cert)
            .map_err(|err| tls_material_error(path, err))?;
    }
    Ok(roots)
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certfile_alone_does_not_engage_tls() {
        let material = TlsClientMaterial {
            certfile: Some(PathBuf::from("client.pem")),
            ..TlsClientMaterial::default()
        };
        assert!(!material.engages_tls());
        assert!(material.is_supplied());
        assert!(material.client_config().unwrap().is_none());
    }

    #[test]
    fn missing_cafile_is_reported_with_its_path() {
        let material = TlsClientMaterial {
            cafile: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsClientMaterial::default()
        };
        let err = material.client_config().unwrap_err();
        match err {
            TransportError::TlsMaterial { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/ca.pem"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
