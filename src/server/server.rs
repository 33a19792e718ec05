use crate::api;
use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::logger::*;
use crate::server::*;
use crate::settings::Settings;
use anyhow::anyhow;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use warp::Filter;

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub credential_store: Arc<dyn CredentialStore>,
    cors_origins: Vec<String>,
    sweeper_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Option<MySqlPool>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        Self::try_new_with_clock(settings, Arc::new(SystemClock)).await
    }

    pub async fn try_new_with_clock(
        settings: &Settings,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        api::validate_cors_origins(&settings.http.cors_origins)?;

        let (credential_store, pool): (Arc<dyn CredentialStore>, Option<MySqlPool>) =
            match settings.store.backend.as_str() {
                "memory" => (Arc::new(MemoryCredentialStore::new()), None),
                "mysql" => {
                    let dsn = settings
                        .store
                        .mysql_dsn
                        .as_deref()
                        .ok_or_else(|| anyhow!("store.mysql_dsn is required for mysql"))?;
                    let pool = MySqlPoolOptions::new()
                        .max_connections(settings.store.max_connections)
                        .connect(dsn)
                        .await?;
                    (Arc::new(MySqlCredentialStore::new(pool.clone())), Some(pool))
                }
                other => return Err(anyhow!("Unknown store backend: {}", other)),
            };

        let auth = &settings.auth;
        let credential_hasher: Arc<dyn CredentialHasher> =
            Arc::new(Argon2PasswordHasher::default());
        let token_codec: Arc<dyn TokenCodec> = Arc::new(JwtHs256Codec::new(
            JwtConfig {
                issuer: auth.issuer.clone(),
                audience: auth.audience.clone(),
                access_ttl: auth.access_ttl(),
                signing_key: auth.signing_key()?,
            },
            clock.clone(),
        ));
        let minter = Arc::new(RefreshTokenMinter::new(
            auth.digest_key()?,
            auth.refresh_ttl(),
        )?);
        let auth_service: Arc<dyn AuthService> = Arc::new(
            RealAuthService::new(
                credential_store.clone(),
                credential_hasher,
                token_codec,
                minter,
                clock.clone(),
            )
            .with_max_refresh_tokens(auth.max_refresh_tokens),
        );

        let cancel = CancellationToken::new();
        let sweeper = RefreshTokenSweeper::new(
            credential_store.clone(),
            clock,
            settings.auth.sweep_interval(),
            cancel.clone(),
        );
        let sweeper_handle = tokio::spawn(async move { sweeper.run().await });

        info!(store = %settings.store.backend, "server started");

        Ok(Self {
            auth_service,
            credential_store,
            cors_origins: settings.http.cors_origins.clone(),
            sweeper_handle: Mutex::new(Some(sweeper_handle)),
            cancel,
            pool,
        })
    }

    pub fn filter(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply + use<>,), Error = Infallible> + Clone + use<> {
        api::app(self.auth_service.clone(), &self.cors_origins)
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        self.cancel.cancel();

        let handle = self
            .sweeper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let r = handle.await;
            info!("sweeper handle dropped: {:?}", r);
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
