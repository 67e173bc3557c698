//! 配置校验模块
//!
//! 校验规则：
//! - 数值范围 (derive 校验：batch_size >= 1, load_limit > 0, 轮询间隔 >= 1ms)
//! - prefetch_threshold <= prefetch_batch_size
//!
//! 非致命问题 (熔断器只配置了一半、阈值为 0) 作为警告返回。

use contracts::{ContractError, PublishConfig};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 校验 PublishConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &PublishConfig) -> Result<(), ContractError> {
    validate_ranges(config)?;
    validate_prefetch_window(config)?;
    Ok(())
}

/// 收集非致命配置警告
pub fn collect_warnings(config: &PublishConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let breaker = &config.circuit_breaker;
    if (breaker.max_error_count > 0) != (breaker.retry_delay_secs > 0) {
        warnings.push(format!(
            "circuit_breaker is inactive: max_error_count ({}) and retry_delay_secs ({}) must both be > 0",
            breaker.max_error_count, breaker.retry_delay_secs
        ));
    }

    if config.dispatch.prefetch_threshold() == 0 {
        warnings.push(
            "dispatch.prefetch_threshold is 0 - dependencies will never be prefetched".to_string(),
        );
    }

    warnings
}

/// 数值范围校验 (validator derive)
fn validate_ranges(config: &PublishConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        ContractError::config_validation(first_error_path(&errors), errors.to_string())
    })
}

/// 校验预取窗口
fn validate_prefetch_window(config: &PublishConfig) -> Result<(), ContractError> {
    let dispatch = &config.dispatch;
    if dispatch.prefetch_threshold() > dispatch.prefetch_batch_size {
        return Err(ContractError::config_validation(
            "dispatch.prefetch_threshold",
            format!(
                "prefetch_threshold ({}) must be <= prefetch_batch_size ({})",
                dispatch.prefetch_threshold(),
                dispatch.prefetch_batch_size
            ),
        ));
    }
    Ok(())
}

/// 将嵌套的校验错误展开为字段路径 (e.g. "dispatch.load_limit")
fn first_error_path(errors: &ValidationErrors) -> String {
    for (field, kind) in errors.errors() {
        match kind {
            ValidationErrorsKind::Field(_) => return field.to_string(),
            ValidationErrorsKind::Struct(inner) => {
                return format!("{field}.{}", first_error_path(inner));
            }
            ValidationErrorsKind::List(entries) => {
                if let Some((idx, inner)) = entries.iter().next() {
                    return format!("{field}[{idx}].{}", first_error_path(inner));
                }
            }
        }
    }
    "<root>".to_string()
}
