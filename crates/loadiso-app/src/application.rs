//! Wiring of backends, routers, gate and service per strategy

use crate::config::{DatasourceStrategy, IsolationConfig, StreamStrategy};
use crate::error::AppError;
use crate::service::UserService;
use futures::future::join_all;
use loadiso_cache::{
    AclUser, CacheManager, CacheSettings, Keyspace, PrefixedCacheManager, RoutingCacheManager,
    ADMIN_CACHE_USER, REAL_CACHE_USER, TEST_CACHE_USER,
};
use loadiso_core::{ClassificationContext, GateError, IngressGate, RequestHeaders, RequestScope};
use loadiso_store::{
    ConnectionPool, DataSource, InMemoryDatabase, PoolSessionMarker, RoleDefinition,
    RoutingDataSource, RowPolicy, SessionBoundDataSource, TEST_MODE_SETTING,
};
use loadiso_stream::{
    provision_shared_stream, spawn_listener, AclOperation, AclResource, Broker, ListenerHandle,
    RealEventConsumer, RoutedStream, SharedStreamConsumer, SingleStreamPublisher, StreamRoute, TestEventConsumer,
    TopicRoutingPublisher, UserEventConsumer, UserEventPublisher,
};
use std::future::Future;
use std::sync::Arc;

/// The three shared backends
#[derive(Debug, Clone)]
pub struct Backends {
    /// Relational database
    pub database: Arc<InMemoryDatabase>,
    /// Cache keyspace
    pub keyspace: Keyspace,
    /// Message broker
    pub broker: Broker,
}

impl Backends {
    /// Create backends with the roles, ACLs and topics `config` expects
    ///
    /// # Errors
    /// - `AppError::Config` if the stream protocol is unknown
    pub fn provision(config: &IsolationConfig) -> Result<Self, AppError> {
        let ds = &config.datasource;
        let database = Arc::new(InMemoryDatabase::new());
        for (name, policy) in [
            (&ds.admin_user, RowPolicy::Bypass),
            (&ds.real_user, RowPolicy::RealOnly),
            (&ds.test_user, RowPolicy::TestOnly),
        ] {
            database.create_role(RoleDefinition::new(name, &ds.password, policy));
        }
        database.create_role(RoleDefinition::new(
            &ds.app_user,
            &ds.password,
            RowPolicy::SessionSetting(TEST_MODE_SETTING.to_string()),
        ));

        let cache = &config.cache;
        let keyspace = Keyspace::default();
        keyspace.set_user(
            REAL_CACHE_USER,
            AclUser::new(&cache.password, [format!("{}*", cache.real_prefix)]),
        );
        keyspace.set_user(
            TEST_CACHE_USER,
            AclUser::new(&cache.password, [format!("{}*", cache.test_prefix)]),
        );
        keyspace.set_user(ADMIN_CACHE_USER, AclUser::new(&cache.password, ["*"]));

        let broker = Broker::new(config.stream.protocol()?);
        provision_shared_stream(&broker);
        let [real, test] = routed_streams(config);
        real.provision(&broker);
        test.provision(&broker);
        grant_shared_access(&broker, config, &real);

        Ok(Self {
            database,
            keyspace,
            broker,
        })
    }
}

fn routed_streams(config: &IsolationConfig) -> [RoutedStream; 2] {
    let stream = &config.stream;
    let mut real = RoutedStream::real(&stream.password);
    real.topic.clone_from(&stream.real_topic);
    real.group.clone_from(&stream.real_group);
    let mut test = RoutedStream::test(&stream.password);
    test.topic.clone_from(&stream.test_topic);
    test.group.clone_from(&stream.test_group);
    [real, test]
}

/// Consumers wired for the stream strategy
#[derive(Debug, Clone)]
pub enum EventConsumers {
    /// Single shared stream
    Shared(Arc<SharedStreamConsumer>),
    /// One consumer per routed stream
    Routed {
        /// Production stream consumer
        real: Arc<RealEventConsumer>,
        /// Load-test stream consumer
        test: Arc<TestEventConsumer>,
    },
}

/// Session-bound datasource and its marker, present under the session strategy
#[derive(Debug, Clone)]
pub struct SessionIsolation {
    /// Datasource holding the per-unit bound sessions
    pub datasource: Arc<SessionBoundDataSource>,
    /// Marker the gate stamps through
    pub marker: Arc<PoolSessionMarker>,
}

/// Running application
#[derive(Debug)]
pub struct Application {
    config: IsolationConfig,
    backends: Backends,
    gate: IngressGate,
    datasource: Arc<dyn DataSource>,
    session: Option<SessionIsolation>,
    service: UserService,
    consumers: EventConsumers,
    listeners: Vec<ListenerHandle>,
}

impl Application {
    /// Wire everything for `config` and start the listeners
    ///
    /// Must be called within a tokio runtime. Every structural problem is
    /// reported here, never on a request.
    ///
    /// # Errors
    /// - `AppError::Config` if `config` is invalid
    /// - `AppError::Store` / `Cache` / `Stream` if a login is rejected
    /// - `AppError::Router` if a router lacks a backend
    pub fn build(config: IsolationConfig, backends: Backends) -> Result<Self, AppError> {
        config.validate()?;
        let (datasource, session) = Self::wire_datasource(&config, &backends)?;
        let gate = match &session {
            Some(session) => IngressGate::with_session_marker(session.marker.clone()),
            None => IngressGate::new(),
        };
        let caches = Self::wire_caches(&config, &backends)?;
        let publisher = Self::wire_publisher(&config, &backends)?;
        let (consumers, listeners) = Self::wire_consumers(&config, &backends)?;

        tracing::info!(
            datasource = ?config.strategy.datasource,
            stream = ?config.strategy.stream,
            protocol = %backends.broker.protocol(),
            "application started"
        );

        let service = UserService::new(Arc::clone(&datasource), caches, publisher);
        Ok(Self {
            config,
            backends,
            gate,
            datasource,
            session,
            service,
            consumers,
            listeners,
        })
    }

    fn wire_datasource(
        config: &IsolationConfig,
        backends: &Backends,
    ) -> Result<(Arc<dyn DataSource>, Option<SessionIsolation>), AppError> {
        let ds = &config.datasource;
        let connect = |user: &str| {
            ConnectionPool::connect(Arc::clone(&backends.database), user, &ds.password, ds.pool_size)
        };
        match config.strategy.datasource {
            DatasourceStrategy::Routing => {
                let routing = RoutingDataSource::from_pools(
                    Some(connect(&ds.real_user)?),
                    Some(connect(&ds.test_user)?),
                )?;
                let datasource: Arc<dyn DataSource> = Arc::new(routing);
                Ok((datasource, None))
            }
            DatasourceStrategy::Session => {
                let bound = Arc::new(SessionBoundDataSource::new(connect(&ds.app_user)?));
                let marker = Arc::new(PoolSessionMarker::new(Arc::clone(&bound)));
                let session = SessionIsolation {
                    datasource: Arc::clone(&bound),
                    marker,
                };
                let datasource: Arc<dyn DataSource> = bound;
                Ok((datasource, Some(session)))
            }
        }
    }

    fn wire_caches(
        config: &IsolationConfig,
        backends: &Backends,
    ) -> Result<RoutingCacheManager, AppError> {
        let cache = &config.cache;
        let real: Arc<dyn CacheManager> = Arc::new(PrefixedCacheManager::new(
            backends.keyspace.connect(REAL_CACHE_USER, &cache.password)?,
            CacheSettings {
                prefix: cache.real_prefix.clone(),
                ttl: cache.real_ttl(),
            },
        )?);
        let test: Arc<dyn CacheManager> = Arc::new(PrefixedCacheManager::new(
            backends.keyspace.connect(TEST_CACHE_USER, &cache.password)?,
            CacheSettings {
                prefix: cache.test_prefix.clone(),
                ttl: cache.test_ttl(),
            },
        )?);
        Ok(RoutingCacheManager::from_managers(Some(real), Some(test))?)
    }

    fn wire_publisher(
        config: &IsolationConfig,
        backends: &Backends,
    ) -> Result<Arc<dyn UserEventPublisher>, AppError> {
        let broker = &backends.broker;
        match config.strategy.stream {
            StreamStrategy::Single => {
                let [real, _] = routed_streams(config);
                let producer = broker.producer(Some(&real.producer))?;
                Ok(Arc::new(SingleStreamPublisher::new(
                    producer,
                    config.stream.shared_topic.clone(),
                )))
            }
            StreamStrategy::Topic => {
                let [real, test] = routed_streams(config);
                let real_route = StreamRoute::new(real.topic, broker.producer(Some(&real.producer))?);
                let test_route = StreamRoute::new(test.topic, broker.producer(Some(&test.producer))?);
                Ok(Arc::new(TopicRoutingPublisher::from_routes(
                    Some(real_route),
                    Some(test_route),
                )?))
            }
        }
    }

    fn wire_consumers(
        config: &IsolationConfig,
        backends: &Backends,
    ) -> Result<(EventConsumers, Vec<ListenerHandle>), AppError> {
        let broker = &backends.broker;
        match config.strategy.stream {
            StreamStrategy::Single => {
                let [real, _] = routed_streams(config);
                let consumer = Arc::new(SharedStreamConsumer::new());
                let subscription = broker.consumer(
                    Some(&real.consumer),
                    &config.stream.shared_group,
                    &config.stream.shared_topic,
                )?;
                let listener =
                    spawn_listener(subscription, Arc::clone(&consumer) as Arc<dyn UserEventConsumer>);
                Ok((EventConsumers::Shared(consumer), vec![listener]))
            }
            StreamStrategy::Topic => {
                let [real, test] = routed_streams(config);
                let real_consumer = Arc::new(RealEventConsumer::new());
                let test_consumer = Arc::new(TestEventConsumer::new());
                let listeners = vec![
                    spawn_listener(
                        broker.consumer(Some(&real.consumer), &real.group, &real.topic)?,
                        Arc::clone(&real_consumer) as Arc<dyn UserEventConsumer>,
                    ),
                    spawn_listener(
                        broker.consumer(Some(&test.consumer), &test.group, &test.topic)?,
                        Arc::clone(&test_consumer) as Arc<dyn UserEventConsumer>,
                    ),
                ];
                Ok((
                    EventConsumers::Routed {
                        real: real_consumer,
                        test: test_consumer,
                    },
                    listeners,
                ))
            }
        }
    }

    /// Handle one request through the ingress gate
    ///
    /// Applies the configured request timeout.
    ///
    /// # Errors
    /// - `GateError::SessionMarking` if test traffic could not be marked
    /// - `GateError::Timeout` if the handler exceeded the timeout
    pub async fn handle<F, Fut, T>(
        &self,
        ctx: &ClassificationContext,
        headers: &RequestHeaders,
        handler: F,
    ) -> Result<T, GateError>
    where
        F: FnOnce(RequestScope) -> Fut,
        Fut: Future<Output = T>,
    {
        match self.config.request_timeout() {
            Some(limit) => self.gate.handle_with_timeout(ctx, headers, limit, handler).await,
            None => self.gate.handle(ctx, headers, handler).await,
        }
    }

    /// Ingress gate
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &IngressGate {
        &self.gate
    }

    /// User service
    #[inline]
    #[must_use]
    pub fn service(&self) -> &UserService {
        &self.service
    }

    /// Datasource the service uses
    #[inline]
    #[must_use]
    pub fn datasource(&self) -> &Arc<dyn DataSource> {
        &self.datasource
    }

    /// Session-bound datasource and marker; `None` under the routing strategy
    #[inline]
    #[must_use]
    pub fn session(&self) -> Option<&SessionIsolation> {
        self.session.as_ref()
    }

    /// Event consumers
    #[inline]
    #[must_use]
    pub fn consumers(&self) -> &EventConsumers {
        &self.consumers
    }

    /// Backends
    #[inline]
    #[must_use]
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    /// Stop the listeners
    pub async fn shutdown(self) {
        join_all(self.listeners.into_iter().map(ListenerHandle::shutdown)).await;
        tracing::info!("application stopped");
    }
}

/// The shared stream is written and read with the production principals
fn grant_shared_access(broker: &Broker, config: &IsolationConfig, real: &RoutedStream) {
    let topic = AclResource::Topic(config.stream.shared_topic.clone());
    broker.create_topic(&config.stream.shared_topic);
    broker.grant(&real.producer.username, topic.clone(), AclOperation::Write);
    broker.grant(&real.consumer.username, topic, AclOperation::Read);
    broker.grant(
        &real.consumer.username,
        AclResource::Group(config.stream.shared_group.clone()),
        AclOperation::Read,
    );
}
