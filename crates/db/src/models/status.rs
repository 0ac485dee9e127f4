//! Text-backed status enums.
//!
//! Each enum maps one-to-one onto the values allowed by the matching
//! `CHECK` constraint in the migrations, and encodes/decodes as `TEXT`.

use photochanger_core::job_events;
use photochanger_core::stats::CounterKind;

/// A stored value did not match any known variant.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Return the stored text value.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl sqlx::Type<sqlx::Postgres> for $name {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <&str as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Postgres> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
                <&str as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $name {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let text = <&str as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
                Ok(text.parse::<Self>()?)
            }
        }
    };
}

define_text_enum! {
    /// Queue position of a job. Terminal state is tracked by `is_finalized`.
    JobStatus {
        Pending = "pending",
        Processing = "processing",
    }
}

define_text_enum! {
    /// Why a finalized job has no result.
    FailureReason {
        Timeout = "timeout",
        ProviderError = "provider_error",
        Cancelled = "cancelled",
        ValidationError = "validation_error",
    }
}

define_text_enum! {
    /// Audit status of a `processing_logs` entry.
    ProcessingStatus {
        Received = "received",
        Dispatched = "dispatched",
        ProviderResponded = "provider_responded",
        Succeeded = "succeeded",
        Timeout = "timeout",
        ProviderError = "provider_error",
        Cancelled = "cancelled",
        Failed = "failed",
    }
}

define_text_enum! {
    /// Lifetime class of a stored media object.
    MediaScope {
        TempPayload = "temp_payload",
        Result = "result",
        Template = "template",
    }
}

impl FailureReason {
    /// Audit status written when a job fails for this reason.
    pub fn log_status(self) -> ProcessingStatus {
        match self {
            Self::Timeout => ProcessingStatus::Timeout,
            Self::ProviderError => ProcessingStatus::ProviderError,
            Self::Cancelled => ProcessingStatus::Cancelled,
            Self::ValidationError => ProcessingStatus::Failed,
        }
    }

    /// Event type published when a job fails for this reason.
    pub fn event_type(self) -> &'static str {
        match self {
            Self::Timeout => job_events::EVENT_JOB_TIMED_OUT,
            Self::Cancelled => job_events::EVENT_JOB_CANCELLED,
            Self::ProviderError | Self::ValidationError => job_events::EVENT_JOB_FAILED,
        }
    }
}

impl ProcessingStatus {
    /// Aggregate counter this status contributes to, if any.
    pub fn counter(self) -> Option<CounterKind> {
        match self {
            Self::Received => Some(CounterKind::Ingest),
            Self::Succeeded => Some(CounterKind::Success),
            Self::Timeout => Some(CounterKind::Timeouts),
            Self::ProviderError => Some(CounterKind::ProviderErrors),
            Self::Cancelled => Some(CounterKind::Cancelled),
            Self::Failed => Some(CounterKind::Errors),
            Self::Dispatched | Self::ProviderResponded => None,
        }
    }

    /// Whether this status closes a job's log.
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            Self::Received | Self::Dispatched | Self::ProviderResponded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_values_round_trip() {
        for reason in [
            FailureReason::Timeout,
            FailureReason::ProviderError,
            FailureReason::Cancelled,
            FailureReason::ValidationError,
        ] {
            assert_eq!(reason.as_str().parse::<FailureReason>().unwrap(), reason);
        }
        assert_eq!(MediaScope::TempPayload.to_string(), "temp_payload");
    }

    #[test]
    fn unknown_text_is_rejected() {
        let err = "done".parse::<JobStatus>().unwrap_err();
        assert_eq!(err.kind, "JobStatus");
    }

    #[test]
    fn audit_only_statuses_have_no_counter() {
        assert_eq!(ProcessingStatus::Dispatched.counter(), None);
        assert_eq!(ProcessingStatus::ProviderResponded.counter(), None);
        assert_eq!(ProcessingStatus::Failed.counter(), Some(CounterKind::Errors));
        assert_eq!(ProcessingStatus::Received.counter(), Some(CounterKind::Ingest));
    }

    #[test]
    fn validation_failures_count_as_errors() {
        assert_eq!(
            FailureReason::ValidationError.log_status(),
            ProcessingStatus::Failed
        );
        assert_eq!(
            FailureReason::Timeout.event_type(),
            job_events::EVENT_JOB_TIMED_OUT
        );
    }

    #[test]
    fn serde_uses_text_values() {
        let json = serde_json::to_string(&ProcessingStatus::ProviderResponded).unwrap();
        assert_eq!(json, "\"provider_responded\"");
    }
}
