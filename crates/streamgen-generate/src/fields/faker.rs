//! Faker-method registry.
//!
//! Methods are resolved through an explicit name-to-function table so an
//! unknown method fails configuration validation before any I/O, not in the
//! middle of a stream.

use fake::faker::address::en::{BuildingNumber, CityName, CountryCode, PostCode, StreetName};
use fake::faker::chrono::en::DateTime;
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::{FreeEmail, Username};
use fake::faker::lorem::en::Word;
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use fake::Fake;
use rand::rngs::StdRng;
use rand::Rng;
use streamgen_core::config::FieldSpec;
use streamgen_core::{CorrelationConfig, GenError, Value};

type FakerFn = fn(&mut StdRng) -> Value;

/// Resolve a faker method name to its generator function.
pub fn lookup(method: &str) -> Option<FakerFn> {
    let f: FakerFn = match method {
        "name" => |rng| Value::String(Name().fake_with_rng::<String, _>(rng)),
        "first_name" => |rng| Value::String(FirstName().fake_with_rng::<String, _>(rng)),
        "last_name" => |rng| Value::String(LastName().fake_with_rng::<String, _>(rng)),
        "email" => |rng| Value::String(FreeEmail().fake_with_rng::<String, _>(rng)),
        "user_name" => |rng| Value::String(Username().fake_with_rng::<String, _>(rng)),
        "phone_number" => |rng| Value::String(PhoneNumber().fake_with_rng::<String, _>(rng)),
        "street_address" => |rng| {
            let number = BuildingNumber().fake_with_rng::<String, _>(rng);
            let street = StreetName().fake_with_rng::<String, _>(rng);
            Value::String(format!("{number} {street}"))
        },
        "city" => |rng| Value::String(CityName().fake_with_rng::<String, _>(rng)),
        "postcode" => |rng| Value::String(PostCode().fake_with_rng::<String, _>(rng)),
        "country_code" => |rng| Value::String(CountryCode().fake_with_rng::<String, _>(rng)),
        "company" => |rng| Value::String(CompanyName().fake_with_rng::<String, _>(rng)),
        "word" => |rng| Value::String(Word().fake_with_rng::<String, _>(rng)),
        "iso8601" => |rng| {
            let dt = DateTime().fake_with_rng::<chrono::DateTime<chrono::Utc>, _>(rng);
            Value::String(dt.to_rfc3339())
        },
        _ => return None,
    };
    Some(f)
}

/// Generate a value for a faker descriptor.
///
/// `bothify` renders its `text` template (`?` becomes a random letter, `#` a
/// random digit); every other method goes through the registry.
pub fn generate(method: &str, text: Option<&str>, rng: &mut StdRng) -> Result<Value, String> {
    if method == "bothify" {
        let text = text.ok_or_else(|| "faker method 'bothify' requires 'text'".to_string())?;
        return Ok(Value::String(bothify(text, rng)));
    }
    match lookup(method) {
        Some(f) => Ok(f(rng)),
        None => Err(format!("unknown faker method '{method}'")),
    }
}

fn bothify(text: &str, rng: &mut StdRng) -> String {
    text.chars()
        .map(|c| match c {
            '?' => rng.random_range(b'A'..=b'Z') as char,
            '#' => char::from_digit(rng.random_range(0..10), 10).unwrap_or('0'),
            other => other,
        })
        .collect()
}

/// Check every faker descriptor in the configuration against the registry.
/// Part of the pre-I/O Init validation.
pub fn validate_fakers(config: &CorrelationConfig) -> Result<(), GenError> {
    let entities = config
        .master_data
        .iter()
        .chain(config.transactional_data.iter());

    for (entity, cfg) in entities {
        let specs = cfg.schema.iter().chain(cfg.derived_fields.iter());
        for (field, spec) in specs {
            if let FieldSpec::Faker { method, text } = spec {
                if method == "bothify" {
                    if text.is_none() {
                        return Err(GenError::config(format!(
                            "field '{entity}.{field}': faker method 'bothify' requires 'text'"
                        )));
                    }
                } else if lookup(method).is_none() {
                    return Err(GenError::config(format!(
                        "field '{entity}.{field}': unknown faker method '{method}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_registry_covers_documented_methods() {
        for method in [
            "name",
            "email",
            "phone_number",
            "street_address",
            "city",
            "postcode",
            "country_code",
            "iso8601",
        ] {
            assert!(lookup(method).is_some(), "missing faker method {method}");
        }
        assert!(lookup("quantum_flux").is_none());
    }

    #[test]
    fn test_generated_values_are_nonempty_strings() {
        let mut rng = StdRng::seed_from_u64(42);
        for method in ["name", "email", "city", "iso8601"] {
            let value = generate(method, None, &mut rng).unwrap();
            assert!(
                value.as_str().is_some_and(|s| !s.is_empty()),
                "empty value from {method}"
            );
        }
    }

    #[test]
    fn test_bothify_shapes_output() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = generate("bothify", Some("??-###"), &mut rng).unwrap();
        let s = value.as_str().unwrap();
        assert_eq!(s.len(), 6);
        assert!(s[..2].chars().all(|c| c.is_ascii_uppercase()));
        assert_eq!(&s[2..3], "-");
        assert!(s[3..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_bothify_without_text_fails() {
        let mut rng = StdRng::seed_from_u64(42);
        assert!(generate("bothify", None, &mut rng).is_err());
    }

    #[test]
    fn test_validate_fakers_rejects_unknown_method() {
        let yaml = r#"
master_data:
  customers:
    kafka_topic: customers
    schema:
      name:
        type: faker
        method: no_such_method
"#;
        let config = CorrelationConfig::from_yaml(yaml).unwrap();
        let err = validate_fakers(&config).unwrap_err();
        assert!(err.to_string().contains("no_such_method"));
    }

    #[test]
    fn test_validate_fakers_accepts_known_methods() {
        let yaml = r#"
master_data:
  customers:
    kafka_topic: customers
    schema:
      name: {type: faker, method: name}
      email: {type: faker, method: email}
      code: {type: faker, method: bothify, text: "??-##"}
"#;
        let config = CorrelationConfig::from_yaml(yaml).unwrap();
        assert!(validate_fakers(&config).is_ok());
    }
}
