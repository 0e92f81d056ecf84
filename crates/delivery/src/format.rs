//! Report and alert message rendering.
//!
//! Produces the Discord-markdown bodies published by the controller. Every
//! line is conditional on its field being available; stale fields carry a
//! trailing dagger explained in the footer legend.

use chrono::{DateTime, Utc};
use sterling_core::report::{
    CompositeReport, Field, HoldingsChange, OUNCES_PER_TONNE,
};

/// Kilograms deliverable per Shanghai contract.
const SHFE_KG_PER_CONTRACT: f64 = 15.0;

/// Format with thousands separators, e.g. `12,345.67`.
fn commas(value: f64, decimals: usize) -> String {
    let formatted = format!("{value:.decimals$}");
    let (sign, rest) = match formatted.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", formatted.as_str()),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rest, None),
    };

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

fn arrow(value: f64) -> &'static str {
    if value > 0.0 {
        "🔺"
    } else if value < 0.0 {
        "🔻"
    } else {
        "➡️"
    }
}

fn stale_mark<T>(field: &Field<T>) -> &'static str {
    if field.is_stale() {
        "†"
    } else {
        ""
    }
}

/// Render the composite report as a Discord-markdown message body.
pub fn render_report(report: &CompositeReport) -> String {
    let mut msg = format!(
        "**📊 Silver Market Update** - {}\n\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );

    msg.push_str("**💹 Real-time Prices**\n");
    if let Some(q) = report.spot_silver.value() {
        msg.push_str(&format!(
            "• XAG/USD Spot: **${:.2}**/oz{}\n",
            q.price,
            stale_mark(&report.spot_silver)
        ));
    }
    if let Some(q) = report.spot_gold.value() {
        msg.push_str(&format!(
            "• XAU/USD Spot: **${:.2}**/oz{}\n",
            q.price,
            stale_mark(&report.spot_gold)
        ));
    }
    if let Some(q) = report.comex.value() {
        let change = q.previous_close.map(|prev| {
            let diff = q.price - prev;
            let pct = if prev != 0.0 { diff / prev * 100.0 } else { 0.0 };
            format!(" {}${:.2} ({:+.2}%)", arrow(diff), diff.abs(), pct)
        });
        msg.push_str(&format!(
            "• COMEX Futures: **${:.2}**/oz{}{}\n",
            q.price,
            change.unwrap_or_default(),
            stale_mark(&report.comex)
        ));
        if let Some(oi) = q.open_interest {
            msg.push_str(&format!("  └ OI: {}", commas(oi as f64, 0)));
            if let Some(delta) = report.deltas.comex_oi {
                msg.push_str(&format!(" (ΔOI: {:+})", delta as i64));
            }
            msg.push('\n');
            let tonnes = oi as f64 * 5_000.0 / OUNCES_PER_TONNE;
            msg.push_str(&format!("  └ Physical equiv: {}t\n", commas(tonnes, 2)));
        }
    }
    if let Some(q) = report.shfe.value() {
        let usd = report
            .derived
            .shfe_usd_oz
            .value()
            .map(|p| format!("**${p:.2}**/oz "))
            .unwrap_or_default();
        msg.push_str(&format!(
            "• SHFE Ag: {}(¥{}/kg){}",
            usd,
            commas(q.price_cny_kg, 0),
            stale_mark(&report.shfe)
        ));
        if let Some(pct) = q.change_pct {
            msg.push_str(&format!(" {pct:+.2}%"));
        }
        msg.push('\n');
        if let Some(oi) = q.open_interest {
            msg.push_str(&format!("  └ OI: {}", commas(oi as f64, 0)));
            if let Some(delta) = report.deltas.shfe_oi {
                msg.push_str(&format!(" (ΔOI: {:+})", delta as i64));
            }
            msg.push('\n');
            let tonnes = oi as f64 * SHFE_KG_PER_CONTRACT / 1_000.0;
            msg.push_str(&format!("  └ Physical equiv: {}t\n", commas(tonnes, 2)));
        }
        if let Some(premium) = report.derived.shanghai_premium.value() {
            msg.push_str(&format!("  └ Shanghai Premium: **${premium:+.2}**\n"));
        }
    }
    if let Some(q) = report.slv_price.value() {
        let pct = q.change_pct.unwrap_or(0.0);
        msg.push_str(&format!(
            "• SLV ETF: **${:.2}** {}{:+.2}%{}\n",
            q.price,
            arrow(pct),
            pct,
            stale_mark(&report.slv_price)
        ));
    }
    if let Some(q) = report.gld_price.value() {
        let pct = q.change_pct.unwrap_or(0.0);
        msg.push_str(&format!(
            "• GLD ETF: **${:.2}** {}{:+.2}%{}\n",
            q.price,
            arrow(pct),
            pct,
            stale_mark(&report.gld_price)
        ));
    }

    let any_holdings = report.inventory.is_available()
        || report.slv_holdings.is_available()
        || report.gld_holdings.is_available();
    if any_holdings {
        msg.push_str("\n**📦 Physical Holdings**\n");
    }
    if let Some(inv) = report.inventory.value() {
        let mark = stale_mark(&report.inventory);
        let reg_t = inv.registered / OUNCES_PER_TONNE;
        let elig_t = inv.eligible / OUNCES_PER_TONNE;
        msg.push_str(&format!(
            "• COMEX Registered: **{}** tonnes (**{}** oz) ({:+.2}t / {:+} oz){}\n",
            commas(reg_t, 2),
            commas(inv.registered, 0),
            inv.delta_registered() / OUNCES_PER_TONNE,
            inv.delta_registered() as i64,
            mark
        ));
        msg.push_str(&format!(
            "          └ Adjustment: {} oz\n",
            commas(inv.registered_adjustment, 0)
        ));
        msg.push_str(&format!(
            "• COMEX Eligible: **{}** tonnes (**{}** oz) ({:+.2}t / {:+} oz){}\n",
            commas(elig_t, 2),
            commas(inv.eligible, 0),
            inv.delta_eligible() / OUNCES_PER_TONNE,
            inv.delta_eligible() as i64,
            mark
        ));
        msg.push_str(&format!(
            "          └ Adjustment: {} oz\n",
            commas(inv.eligible_adjustment, 0)
        ));
        if let Some(share) = report.derived.registered_share.value() {
            msg.push_str(&format!("  └ Reg/Total: {:.2}%\n", share * 100.0));
        }
    }
    if let Some(h) = report.slv_holdings.value() {
        msg.push_str(&format!(
            "• SLV Trust: **{}** tonnes (**{}** oz){}",
            commas(h.tonnes, 2),
            commas(h.ounces, 0),
            stale_mark(&report.slv_holdings)
        ));
        if let Some(delta) = report.deltas.slv_tonnes {
            msg.push_str(&format!(" ({delta:+.2}t)"));
        }
        msg.push('\n');
    }
    if let Some(h) = report.gld_holdings.value() {
        msg.push_str(&format!(
            "• GLD Trust: **{}** tonnes (**{}** oz){}",
            commas(h.tonnes, 2),
            commas(h.ounces, 0),
            stale_mark(&report.gld_holdings)
        ));
        if let Some(delta) = report.deltas.gld_tonnes {
            msg.push_str(&format!(" ({delta:+.2}t)"));
        }
        msg.push('\n');
    }

    if let Some(rate) = report.usd_cny.value() {
        msg.push_str(&format!(
            "\n**💱 FX Rate**\n• USD/CNY: **{:.4}**{}\n",
            rate,
            stale_mark(&report.usd_cny)
        ));
    }

    if let Some(rows) = report.deliveries.value() {
        msg.push_str(&format!(
            "\n**📦 Deliveries (Last {} Days)**{}\n",
            rows.len().min(3),
            stale_mark(&report.deliveries)
        ));
        let start = rows.len().saturating_sub(3);
        for row in &rows[start..] {
            msg.push_str(&format!(
                "• {}: **{}** daily, **{}** cumulative\n",
                row.intent_date.format("%m/%d/%Y"),
                commas(row.daily as f64, 0),
                commas(row.cumulative as f64, 0)
            ));
        }
    }

    let mut metrics = Vec::new();
    if let Some(ratio) = report.derived.paper_to_physical.value() {
        metrics.push(format!("• Paper/Physical: **{ratio:.2}x**"));
    }
    if let Some(basis) = report.derived.futures_basis.value() {
        metrics.push(format!("• Futures Basis: **${basis:+.3}**"));
    }
    if let Some(coverage) = report.derived.slv_coverage.value() {
        metrics.push(format!("• SLV Coverage: **{coverage:.4}**"));
    }
    if !metrics.is_empty() {
        msg.push_str("\n**📈 Key Metrics**\n");
        for line in metrics {
            msg.push_str(&line);
            msg.push('\n');
        }
    }

    msg.push_str("\n─────────────────────────────\n");
    msg.push_str(
        "`†` stale (serving last good value) │ `Paper/Physical` = (OI×5000oz) / Registered │ \
         `Basis` = Futures - Spot",
    );
    msg
}

/// Render a trust-holdings change alert.
pub fn render_alert(changes: &[HoldingsChange], at: DateTime<Utc>) -> String {
    let mut msg = format!(
        "🚨 **ETF Holdings Update Detected!** - {}\n\n",
        at.format("%Y-%m-%d %H:%M UTC")
    );
    for change in changes {
        msg.push_str(&format!(
            "• {}: **{}** tonnes",
            change.trust,
            commas(change.tonnes, 2)
        ));
        if let Some(delta) = change.delta_tonnes {
            msg.push_str(&format!(" ({delta:+.2}t)"));
        }
        msg.push('\n');
    }
    msg
}

/// Compact holdings summary used as the plot message body. Chart images are
/// the dashboard collaborator's job; this is the text stand-in it replaces.
pub fn render_plot_summary(report: &CompositeReport) -> String {
    let mut msg = format!(
        "**📊 ETF Holdings Report** - {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(h) = report.slv_holdings.value() {
        msg.push_str(&format!("• SLV: **{}** tonnes", commas(h.tonnes, 2)));
        if let Some(delta) = report.deltas.slv_tonnes {
            msg.push_str(&format!(" ({delta:+.2}t)"));
        }
        msg.push('\n');
    }
    if let Some(h) = report.gld_holdings.value() {
        msg.push_str(&format!("• GLD: **{}** tonnes", commas(h.tonnes, 2)));
        if let Some(delta) = report.deltas.gld_tonnes {
            msg.push_str(&format!(" ({delta:+.2}t)"));
        }
        msg.push('\n');
    }
    if !report.slv_holdings.is_available() && !report.gld_holdings.is_available() {
        msg.push_str("• No holdings data available\n");
    }
    msg
}
