//! Configuration types for AVD prerequisite provisioning

use std::time::Duration;

/// Default image definition metadata for an AVD multi-session image
pub const DEFAULT_PUBLISHER: &str = "MicrosoftWindowsDesktop";
pub const DEFAULT_OFFER: &str = "office-365";
pub const DEFAULT_SKU: &str = "win11-24h2-avd-m365";

/// Default pause after identity creation, for directory propagation
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Target environment for one provisioning run
#[derive(Debug, Clone)]
pub struct AvdConfig {
    /// Subscription identifier
    pub subscription: String,
    /// Resource group that holds the image-build resources
    pub resource_group: String,
    /// Region for created resources
    pub location: String,
    /// Name of the managed identity the image builder runs as
    pub identity_name: String,
    /// Existing resource group holding the virtual network to attach builds
    /// to; enables the networking role definition and assignment
    pub network_resource_group: Option<String>,
    /// Compute gallery name; enables gallery provisioning
    pub gallery_name: Option<String>,
    /// Image definition name within the gallery; requires `gallery_name`
    pub image_definition_name: Option<String>,
    /// Image definition metadata, used only when an image definition is
    /// requested
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    /// Pause after creating (not finding) the managed identity before any
    /// dependent call uses its principal ID
    pub settle_delay: Duration,
}

impl AvdConfig {
    pub fn builder() -> AvdConfigBuilder {
        AvdConfigBuilder::default()
    }

    /// Role name for the image-build role definition.
    ///
    /// Derived from the resource group rather than a timestamp so a re-run
    /// finds the same role instead of minting a new one.
    pub fn image_role_name(&self) -> String {
        format!("Azure Image Builder Image Def ({})", self.resource_group)
    }

    /// Role name for the networking role definition
    pub fn network_role_name(&self) -> String {
        format!("Azure Image Builder Networking ({})", self.resource_group)
    }

    /// Create a test configuration for unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            subscription: "sub1".into(),
            resource_group: "rg1".into(),
            location: "eastus".into(),
            identity_name: "avdImageBuilderIdentity".into(),
            network_resource_group: None,
            gallery_name: None,
            image_definition_name: None,
            publisher: DEFAULT_PUBLISHER.into(),
            offer: DEFAULT_OFFER.into(),
            sku: DEFAULT_SKU.into(),
            settle_delay: Duration::ZERO,
        }
    }
}

/// Builder for [`AvdConfig`]
#[derive(Debug, Clone)]
pub struct AvdConfigBuilder {
    config: AvdConfig,
}

impl Default for AvdConfigBuilder {
    fn default() -> Self {
        Self {
            config: AvdConfig {
                subscription: String::new(),
                resource_group: String::new(),
                location: String::new(),
                identity_name: "avdImageBuilderIdentity".into(),
                network_resource_group: None,
                gallery_name: None,
                image_definition_name: None,
                publisher: DEFAULT_PUBLISHER.into(),
                offer: DEFAULT_OFFER.into(),
                sku: DEFAULT_SKU.into(),
                settle_delay: DEFAULT_SETTLE_DELAY,
            },
        }
    }
}

impl AvdConfigBuilder {
    /// Set the subscription identifier
    pub fn subscription(mut self, subscription: impl Into<String>) -> Self {
        self.config.subscription = subscription.into();
        self
    }

    /// Set the resource group name
    pub fn resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.config.resource_group = resource_group.into();
        self
    }

    /// Set the region
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.location = location.into();
        self
    }

    /// Set the managed identity name
    pub fn identity_name(mut self, name: impl Into<String>) -> Self {
        self.config.identity_name = name.into();
        self
    }

    /// Attach builds to a virtual network in this existing resource group
    pub fn network_resource_group(mut self, name: impl Into<Option<String>>) -> Self {
        self.config.network_resource_group = name.into();
        self
    }

    /// Create or reuse a compute gallery with this name
    pub fn gallery_name(mut self, name: impl Into<Option<String>>) -> Self {
        self.config.gallery_name = name.into();
        self
    }

    /// Create or reuse an image definition with this name
    pub fn image_definition_name(mut self, name: impl Into<Option<String>>) -> Self {
        self.config.image_definition_name = name.into();
        self
    }

    /// Set the image definition publisher
    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.config.publisher = publisher.into();
        self
    }

    /// Set the image definition offer
    pub fn offer(mut self, offer: impl Into<String>) -> Self {
        self.config.offer = offer.into();
        self
    }

    /// Set the image definition sku
    pub fn sku(mut self, sku: impl Into<String>) -> Self {
        self.config.sku = sku.into();
        self
    }

    /// Set the identity settle delay
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay = delay;
        self
    }

    /// Build the configuration
    pub fn build(self) -> AvdConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_stable_per_resource_group() {
        let config = AvdConfig::test_config();
        assert_eq!(config.image_role_name(), config.image_role_name());
        assert!(config.image_role_name().contains("rg1"));
        assert!(config.network_role_name().contains("rg1"));
    }

    #[test]
    fn builder_defaults_image_metadata() {
        let config = AvdConfig::builder()
            .subscription("sub1")
            .resource_group("rg1")
            .location("westeurope")
            .build();
        assert_eq!(config.publisher, DEFAULT_PUBLISHER);
        assert_eq!(config.offer, DEFAULT_OFFER);
        assert_eq!(config.sku, DEFAULT_SKU);
        assert_eq!(config.settle_delay, DEFAULT_SETTLE_DELAY);
    }
}
