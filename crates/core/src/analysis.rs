//! Analysis dispatch.
//!
//! [`Analyzer`] is the single entry point for turning photos into an
//! [`AnalyzeResponse`]. It validates the images before anything touches the
//! network, picks the provider and model, builds the prompt and runs the
//! call under the configured time bound and the caller's cancellation token.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::image_processing::parse_data_url;
use crate::prompt::build_prompt;
use crate::providers::{AnalysisRequest, AnalyzeResponse, ProviderKind, VisionProvider, build_provider};
use crate::settings::Settings;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub struct Analyzer {
    config: Config,
    provider: Option<Arc<dyn VisionProvider>>,
}

impl Analyzer {
    /// Creates an analyzer that builds the configured backend per call.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    /// Creates an analyzer that always uses `provider`.
    pub fn with_provider(config: Config, provider: Arc<dyn VisionProvider>) -> Self {
        Self {
            config,
            provider: Some(provider),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolves which provider and model a call will use.
    ///
    /// Environment overrides win over settings. Overriding only the provider
    /// falls back to that provider's default model, since the persisted model
    /// belongs to a different catalogue.
    pub fn selection(&self, settings: &Settings) -> (ProviderKind, String) {
        let provider = self
            .provider
            .as_ref()
            .map(|p| p.kind())
            .or(self.config.provider)
            .unwrap_or(settings.provider);

        let model = match &self.config.model {
            Some(model) => model.clone(),
            None if provider == settings.provider => settings.model.clone(),
            None => provider.default_model().to_string(),
        };
        (provider, model)
    }

    /// Analyses `images` (data URLs) with the user's settings and optional
    /// free-text context.
    ///
    /// # Errors
    ///
    /// - `format` when there are no images or one is not a data URL; no
    ///   request is sent in that case
    /// - [`AppError::MissingEnvVar`] when the provider has no credential
    /// - [`AppError::Timeout`] when the call exceeds the request timeout
    /// - [`AppError::Cancelled`] when `cancel` fires first
    /// - any classified provider failure
    #[instrument(skip_all, fields(images = images.len()))]
    pub async fn analyze(
        &self,
        images: &[String],
        settings: &Settings,
        context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AnalyzeResponse> {
        if images.is_empty() {
            return Err(AppError::format("No images found to analyse"));
        }
        for image in images {
            parse_data_url(image)?;
        }

        let (kind, model) = self.selection(settings);
        let provider: Arc<dyn VisionProvider> = match &self.provider {
            Some(provider) => Arc::clone(provider),
            None => Arc::from(build_provider(kind, &self.config)?),
        };

        let request = AnalysisRequest {
            images: images.to_vec(),
            prompt: build_prompt(settings, context),
            model,
        };
        info!(provider = %kind, model = %request.model, "dispatching analysis");
        debug!(prompt_chars = request.prompt.len(), "prompt built");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            outcome = tokio::time::timeout(self.config.request_timeout, provider.analyze(&request)) => match outcome {
                Err(_) => Err(AppError::Timeout(format!("waiting for {}", kind.display_name()))),
                Ok(result) => result,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AnalysisErrorKind;
    use crate::providers::AnalysisResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider double that records requests and answers with a fixed result,
    /// or a safety refusal when none is set.
    pub(crate) struct StubProvider {
        pub result: Option<AnalysisResult>,
        pub delay: Duration,
        pub calls: AtomicUsize,
        pub last_request: Mutex<Option<AnalysisRequest>>,
    }

    impl StubProvider {
        pub(crate) fn answering(result: AnalysisResult) -> Self {
            Self {
                result: Some(result),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VisionProvider for StubProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenRouter
        }

        async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalyzeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.result {
                Some(result) => Ok(AnalyzeResponse {
                    result: result.clone(),
                    usage: None,
                }),
                None => Err(AppError::safety("blocked")),
            }
        }
    }

    pub(crate) fn chair() -> AnalysisResult {
        AnalysisResult {
            description: "Spisebordsstol eg".to_string(),
            price: 250.0,
            brand: "Hay".to_string(),
            ..AnalysisResult::default()
        }
    }

    const IMAGE: &str = "data:image/jpeg;base64,/9j/4AAQ";

    fn analyzer(stub: Arc<StubProvider>) -> Analyzer {
        Analyzer::with_provider(Config::builder().build().unwrap(), stub)
    }

    #[tokio::test]
    async fn zero_images_fail_without_a_call() {
        let stub = Arc::new(StubProvider::answering(chair()));
        let err = analyzer(stub.clone())
            .analyze(&[], &Settings::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Format));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_image_fails_without_a_call() {
        let stub = Arc::new(StubProvider::answering(chair()));
        let err = analyzer(stub.clone())
            .analyze(&["garbage".to_string()], &Settings::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Format));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn sends_prompt_and_model() {
        let stub = Arc::new(StubProvider::answering(chair()));
        let response = analyzer(stub.clone())
            .analyze(&[IMAGE.to_string()], &Settings::default(), Some("ridse i sædet"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.result.price, 250.0);
        let request = stub.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.model, Settings::default().model);
        assert!(request.prompt.ends_with("ridse i sædet"));
        assert_eq!(request.images, vec![IMAGE.to_string()]);
    }

    #[tokio::test]
    async fn cancelled_token_wins() {
        let stub = Arc::new(StubProvider::answering(chair()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = analyzer(stub)
            .analyze(&[IMAGE.to_string()], &Settings::default(), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let mut stub = StubProvider::answering(chair());
        stub.delay = Duration::from_secs(120);
        let config = Config::builder()
            .with_request_timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let err = Analyzer::with_provider(config, Arc::new(stub))
            .analyze(&[IMAGE.to_string()], &Settings::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(err.analysis_kind(), Some(AnalysisErrorKind::Network));
    }

    #[test]
    fn provider_override_uses_its_default_model() {
        let config = Config::builder()
            .with_provider(ProviderKind::Google)
            .build()
            .unwrap();
        let (kind, model) = Analyzer::new(config).selection(&Settings::default());
        assert_eq!(kind, ProviderKind::Google);
        assert_eq!(model, ProviderKind::Google.default_model());

        let config = Config::builder().with_model("custom/model").build().unwrap();
        let (kind, model) = Analyzer::new(config).selection(&Settings::default());
        assert_eq!(kind, ProviderKind::OpenRouter);
        assert_eq!(model, "custom/model");
    }

    #[tokio::test]
    async fn missing_credential_is_reported() {
        let err = Analyzer::new(Config::builder().build().unwrap())
            .analyze(&[IMAGE.to_string()], &Settings::default(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingEnvVar(var) if var == "OPENROUTER_API_KEY"));
    }
}
