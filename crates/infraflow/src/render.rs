//! ターミナル出力
//!
//! プラン差分・適用結果・出力値の表示を担当します。
//! 機密属性は常にマスクして表示します。

use colored::*;
use infraflow_cloud::{
    Action, ActionType, ApplyResult, AttributeChange, OutputValue, Plan, ProviderSchema,
    ResourceState,
};
use infraflow_core::NodeAddress;
use serde_json::Value;

const MASK: &str = "(sensitive)";
const KNOWN_AFTER_APPLY: &str = "(known after apply)";

fn is_sensitive(schema: &ProviderSchema, address: &NodeAddress, field: &str) -> bool {
    schema
        .get(address.mode, &address.kind)
        .is_some_and(|s| s.is_sensitive(field))
}

/// 値を1行で表示する
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

fn symbol(action: &Action) -> ColoredString {
    match action.action_type {
        ActionType::Create if action.address.is_data() => "<=".cyan(),
        ActionType::Update if action.address.is_data() => "<=".cyan(),
        ActionType::Create => "+".green(),
        ActionType::Update => "~".yellow(),
        ActionType::Replace => "-/+".magenta(),
        ActionType::Delete => "-".red(),
        ActionType::NoOp => " ".normal(),
    }
}

fn label(action: &Action) -> String {
    match action.action_type {
        ActionType::Create if action.address.is_data() => "読み取り".to_string(),
        ActionType::Update if action.address.is_data() => "再読み取り".to_string(),
        ActionType::Create => "作成".to_string(),
        ActionType::Update => "変更".to_string(),
        ActionType::Replace => {
            let reasons = action.replacement_reasons();
            if reasons.is_empty() {
                "再作成".to_string()
            } else {
                format!("再作成（{} の変更）", reasons.join(", "))
            }
        }
        ActionType::Delete => "削除".to_string(),
        ActionType::NoOp => "変更なし".to_string(),
    }
}

fn format_change(schema: &ProviderSchema, address: &NodeAddress, change: &AttributeChange) -> String {
    let sensitive = is_sensitive(schema, address, &change.name);
    let show = |value: &Option<Value>| match value {
        Some(_) if sensitive => MASK.to_string(),
        Some(v) => format_value(v),
        None => "null".to_string(),
    };

    let after = if change.unknown {
        KNOWN_AFTER_APPLY.dimmed().to_string()
    } else {
        show(&change.after)
    };
    let line = match &change.before {
        None => format!("{} = {}", change.name, after),
        Some(_) => format!("{} = {} → {}", change.name, show(&change.before), after),
    };

    if change.forces_replacement {
        format!("{} {}", line, "# 再作成が必要".red())
    } else {
        line
    }
}

/// プランを表示する
pub fn print_plan(plan: &Plan, schema: &ProviderSchema) {
    if !plan.has_changes {
        println!("{}", "✓ 変更はありません。宣言と状態は一致しています".green());
        return;
    }

    println!("{}", "実行計画:".bold());
    println!();

    for action in &plan.actions {
        if action.action_type == ActionType::NoOp {
            continue;
        }
        println!(
            "  {} {} {}",
            symbol(action),
            action.address.to_string().bold(),
            format!("({})", label(action)).dimmed()
        );
        for change in &action.changes {
            println!(
                "      {}",
                format_change(schema, &action.address, change)
            );
        }
    }

    println!();
    print_summary(plan);
}

pub fn print_summary(plan: &Plan) {
    let summary = plan.summary();
    println!(
        "{} 作成 {}, 変更 {}, 再作成 {}, 削除 {}, 変更なし {}",
        "計画:".bold(),
        summary.create.to_string().green(),
        summary.update.to_string().yellow(),
        summary.replace.to_string().magenta(),
        summary.delete.to_string().red(),
        summary.no_change
    );
}

/// 適用結果を表示する
pub fn print_apply_result(result: &ApplyResult) {
    println!();
    for r in &result.succeeded {
        println!("  {} {} ({})", "✓".green(), r.address, r.action_type);
    }
    for r in &result.failed {
        println!(
            "  {} {} ({}): {}",
            "✗".red().bold(),
            r.address,
            r.action_type,
            r.error.as_deref().unwrap_or("")
        );
    }
    for r in &result.skipped {
        println!("  {} {}: {}", "-".yellow(), r.address, r.message.dimmed());
    }

    println!();
    let elapsed = result.duration_ms as f64 / 1000.0;
    if result.is_success() {
        println!(
            "{}",
            format!(
                "✓ 適用が完了しました（成功 {} 件, {:.1}秒）",
                result.succeeded.len(),
                elapsed
            )
            .green()
            .bold()
        );
    } else if result.cancelled {
        println!(
            "{}",
            format!(
                "⚠ 適用を中断しました（成功 {} 件, 失敗 {} 件, 未実行 {} 件）",
                result.succeeded.len(),
                result.failed.len(),
                result.skipped.len()
            )
            .yellow()
            .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "✗ 一部の適用に失敗しました（成功 {} 件, 失敗 {} 件, スキップ {} 件）",
                result.succeeded.len(),
                result.failed.len(),
                result.skipped.len()
            )
            .red()
            .bold()
        );
    }
}

/// 出力値を表示する
pub fn print_outputs(outputs: &[OutputValue]) {
    if outputs.is_empty() {
        return;
    }
    println!();
    println!("{}", "出力:".bold());
    for output in outputs {
        let value = match &output.value {
            Some(_) if output.sensitive => MASK.to_string(),
            Some(v) => format_value(v),
            None => "(未作成)".dimmed().to_string(),
        };
        println!("  {} = {}", output.name.cyan(), value);
    }
}

/// 状態ファイルの1エントリを表示する
pub fn print_resource(address: &NodeAddress, entry: &ResourceState, schema: &ProviderSchema) {
    println!("{}", address.to_string().bold());
    println!("  id         = {}", entry.id);
    println!("  status     = {}", entry.status);
    println!("  created_at = {}", entry.created_at.to_rfc3339());
    println!("  updated_at = {}", entry.updated_at.to_rfc3339());

    let field = |name: &str, value: &Value| {
        if is_sensitive(schema, address, name) {
            format!("    {} = {}", name, MASK)
        } else {
            format!("    {} = {}", name, format_value(value))
        }
    };

    if !entry.inputs.is_empty() {
        println!("  {}", "inputs:".dimmed());
        for (name, value) in &entry.inputs {
            println!("{}", field(name, value));
        }
    }
    if !entry.attributes.is_empty() {
        println!("  {}", "attributes:".dimmed());
        for (name, value) in &entry.attributes {
            println!("{}", field(name, value));
        }
    }
    if !entry.dependencies.is_empty() {
        let deps: Vec<String> = entry.dependencies.iter().map(|d| d.to_string()).collect();
        println!("  depends_on = [{}]", deps.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infraflow_cloud_local::local_schema;
    use serde_json::json;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("ru-central1-a")), "\"ru-central1-a\"");
        assert_eq!(format_value(&json!(128)), "128");
        assert_eq!(format_value(&json!(["10.2.0.0/16"])), "[\"10.2.0.0/16\"]");
    }

    #[test]
    fn test_sensitive_change_is_masked() {
        colored::control::set_override(false);
        let schema = local_schema();
        let address = NodeAddress::managed("bucket", "forms");
        let change = AttributeChange {
            name: "secret_key".to_string(),
            before: Some(json!("YCold")),
            after: Some(json!("YCnew")),
            unknown: false,
            forces_replacement: false,
        };

        let line = format_change(&schema, &address, &change);
        assert!(!line.contains("YCold"));
        assert!(!line.contains("YCnew"));
        assert!(line.contains(MASK));
    }

    #[test]
    fn test_unknown_and_replacement_markers() {
        colored::control::set_override(false);
        let schema = local_schema();
        let address = NodeAddress::managed("subnet", "form-subnet");
        let change = AttributeChange {
            name: "network_id".to_string(),
            before: Some(json!("enp-old")),
            after: None,
            unknown: true,
            forces_replacement: true,
        };

        let line = format_change(&schema, &address, &change);
        assert!(line.contains("\"enp-old\""));
        assert!(line.contains(KNOWN_AFTER_APPLY));
        assert!(line.contains("再作成が必要"));
    }

    #[test]
    fn test_data_source_label() {
        let read = Action::new(
            ActionType::Create,
            NodeAddress::data("secret_version", "form-keys"),
        );
        assert_eq!(label(&read), "読み取り");

        let mut replace = Action::new(
            ActionType::Replace,
            NodeAddress::managed("bucket", "forms"),
        );
        replace.changes.push(AttributeChange {
            name: "bucket".to_string(),
            before: Some(json!("a")),
            after: Some(json!("b")),
            unknown: false,
            forces_replacement: true,
        });
        assert_eq!(label(&replace), "再作成（bucket の変更）");
    }
}
