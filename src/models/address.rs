use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Where a physical order ships to.
///
/// Field names follow Printful's recipient object so the same value can be
/// handed to the fulfillment API unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub address1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 200))]
    pub address2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[serde(default, alias = "stateCode", skip_serializing_if = "Option::is_none")]
    pub state_code: Option<String>,
    /// ISO 3166-1 alpha-2
    #[serde(alias = "countryCode")]
    #[validate(length(equal = 2))]
    pub country_code: String,
    #[validate(length(min = 1, max = 32))]
    pub zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(email)]
    pub email: Option<String>,
}

impl ShippingAddress {
    /// Upper-cases country and state codes and trims surrounding whitespace.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_string();
        self.address1 = self.address1.trim().to_string();
        self.city = self.city.trim().to_string();
        self.zip = self.zip.trim().to_string();
        self.country_code = self.country_code.trim().to_ascii_uppercase();
        self.state_code = self
            .state_code
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty());
        self.address2 = self
            .address2
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self
    }

    /// Copy without the optional contact fields, used when space is tight.
    pub fn without_contact(&self) -> Self {
        Self {
            phone: None,
            email: None,
            address2: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_camel_case_aliases() {
        let addr: ShippingAddress = serde_json::from_value(serde_json::json!({
            "name": "Ada",
            "address1": "1 Loop Rd",
            "city": "Austin",
            "stateCode": "tx",
            "countryCode": "us",
            "zip": "73301"
        }))
        .unwrap();
        let addr = addr.normalized();
        assert_eq!(addr.country_code, "US");
        assert_eq!(addr.state_code.as_deref(), Some("TX"));
        assert!(addr.validate().is_ok());
    }

    #[test]
    fn rejects_long_country_code() {
        let addr = ShippingAddress {
            name: "Ada".into(),
            address1: "1 Loop Rd".into(),
            address2: None,
            city: "Austin".into(),
            state_code: None,
            country_code: "USA".into(),
            zip: "73301".into(),
            phone: None,
            email: None,
        };
        assert!(addr.validate().is_err());
    }
}
