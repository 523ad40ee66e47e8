//! One dispatcher per channel, selected by exhaustive match.

use std::sync::Arc;

use campaign_core::config::DispatchConfig;
use campaign_core::types::Channel;

use crate::dispatcher::ChannelDispatcher;
use crate::provider::{ChannelProvider, LoggingProvider};

pub struct ProviderSet {
    pub call: Arc<dyn ChannelProvider>,
    pub social: Arc<dyn ChannelProvider>,
    pub text: Arc<dyn ChannelProvider>,
    pub email: Arc<dyn ChannelProvider>,
}

impl ProviderSet {
    pub fn logging() -> Self {
        Self {
            call: Arc::new(LoggingProvider::new(Channel::Call)),
            social: Arc::new(LoggingProvider::new(Channel::Social)),
            text: Arc::new(LoggingProvider::new(Channel::Text)),
            email: Arc::new(LoggingProvider::new(Channel::Email)),
        }
    }

    /// Same provider behind every channel.
    pub fn uniform(provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            call: provider.clone(),
            social: provider.clone(),
            text: provider.clone(),
            email: provider,
        }
    }
}

#[derive(Clone)]
pub struct DispatcherSet {
    call: ChannelDispatcher,
    social: ChannelDispatcher,
    text: ChannelDispatcher,
    email: ChannelDispatcher,
}

impl DispatcherSet {
    pub fn new(config: &DispatchConfig, providers: ProviderSet) -> Self {
        Self {
            call: ChannelDispatcher::new(Channel::Call, &config.call, providers.call),
            social: ChannelDispatcher::new(Channel::Social, &config.social, providers.social),
            text: ChannelDispatcher::new(Channel::Text, &config.text, providers.text),
            email: ChannelDispatcher::new(Channel::Email, &config.email, providers.email),
        }
    }

    pub fn for_channel(&self, channel: Channel) -> &ChannelDispatcher {
        match channel {
            Channel::Call => &self.call,
            Channel::Social => &self.social,
            Channel::Text => &self.text,
            Channel::Email => &self.email,
        }
    }
}
