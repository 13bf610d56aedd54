//! Company name → candidate mail domain resolution.
//!
//! Resolution order (first matching rule wins, rules are never merged):
//!   1. Exact match against the well-known company table
//!   2. Substring match, iterated in table order
//!   3. Heuristic: strip corporate-entity tokens and synthesize
//!      {name}.co.jp / .com / .jp / .net, plus a catch-all
//!
//! The table is an ordered slice, not a map: two keys can both
//! substring-match a query and the winner must be reproducible.

use std::sync::OnceLock;

use regex::Regex;

/// Low-confidence catch-all appended by the heuristic rule. Plenty of
/// small companies run recruiting from a plain Gmail address.
pub const CATCH_ALL_DOMAIN: &str = "gmail.com";

/// Well-known company → mail domains, in precedence order.
const COMPANY_DOMAINS: &[(&str, &[&str])] = &[
    // IT / Web
    ("サイバーエージェント", &["cyberagent.co.jp", "ca-base.jp"]),
    ("DeNA", &["dena.com", "dena.jp"]),
    ("LINE", &["linecorp.com"]),
    ("メルカリ", &["mercari.com"]),
    ("楽天", &["rakuten.co.jp", "rakuten.com"]),
    ("ヤフー", &["yahoo.co.jp", "z-corp.co.jp"]),
    ("リクルート", &["recruit.co.jp", "r.recruit.co.jp"]),
    ("GMO", &["gmo.jp", "gmo-media.jp"]),
    ("サイボウズ", &["cybozu.co.jp"]),
    ("freee", &["freee.co.jp"]),
    // Consulting
    ("アクセンチュア", &["accenture.com"]),
    ("デロイト", &["deloitte.com", "tohmatsu.co.jp"]),
    ("PwC", &["pwc.com"]),
    ("EY", &["ey.com"]),
    ("マッキンゼー", &["mckinsey.com"]),
    // Finance
    ("三菱UFJ", &["mufg.jp", "bk.mufg.jp"]),
    ("三井住友", &["smbc.co.jp", "smfg.co.jp"]),
    ("みずほ", &["mizuho-fg.co.jp", "mizuhobank.co.jp"]),
    ("野村證券", &["nomura.co.jp"]),
    ("大和証券", &["daiwa.co.jp"]),
    // Trading houses
    ("三菱商事", &["mitsubishicorp.com"]),
    ("三井物産", &["mitsui.com"]),
    ("伊藤忠", &["itochu.co.jp"]),
    ("住友商事", &["sumitomocorp.com"]),
    ("丸紅", &["marubeni.com"]),
    // Manufacturers
    ("ソニー", &["sony.com", "sony.co.jp"]),
    ("パナソニック", &["panasonic.com", "panasonic.co.jp"]),
    ("トヨタ", &["toyota.co.jp", "toyota.com"]),
    ("日立", &["hitachi.co.jp", "hitachi.com"]),
    ("キヤノン", &["canon.co.jp", "canon.com"]),
    // Telecom
    ("NTT", &["ntt.co.jp", "ntt.com"]),
    ("ソフトバンク", &["softbank.co.jp", "softbank.jp"]),
    ("KDDI", &["kddi.com"]),
    // Others
    ("電通", &["dentsu.co.jp", "dentsu.com"]),
    ("博報堂", &["hakuhodo.co.jp"]),
    ("ベネッセ", &["benesse.co.jp"]),
];

fn entity_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"株式会社|有限会社|合同会社|合資会社|\(.*?\)|（.*?）|\s").expect("static regex")
    })
}

/// Resolve a free-text company name to an ordered list of candidate
/// mail domains. Total and deterministic; the result is never empty.
pub fn resolve(company_name: &str) -> Vec<String> {
    // Rule 1: exact table match
    for (key, domains) in COMPANY_DOMAINS {
        if *key == company_name {
            return domains.iter().map(|d| d.to_string()).collect();
        }
    }

    // Rule 2: substring match, in table order
    for (key, domains) in COMPANY_DOMAINS {
        if company_name.contains(key) || key.contains(company_name) {
            return domains.iter().map(|d| d.to_string()).collect();
        }
    }

    // Rule 3: heuristic from the cleaned name
    let clean = entity_token_re()
        .replace_all(company_name, "")
        .to_lowercase();

    let mut domains = Vec::new();
    if !clean.is_empty() {
        domains.push(format!("{clean}.co.jp"));
        domains.push(format!("{clean}.com"));
        domains.push(format!("{clean}.jp"));
        domains.push(format!("{clean}.net"));
    }
    domains.push(CATCH_ALL_DOMAIN.to_string());
    domains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_returns_table_entry() {
        let domains = resolve("サイバーエージェント");
        assert_eq!(domains, vec!["cyberagent.co.jp", "ca-base.jp"]);
    }

    #[test]
    fn test_exact_match_takes_precedence_over_substring() {
        // "三井住友" is an exact key; "三井物産" would also substring-match
        // a query containing 三井 — exact lookup must not fall through.
        let domains = resolve("三井住友");
        assert_eq!(domains, vec!["smbc.co.jp", "smfg.co.jp"]);
    }

    #[test]
    fn test_substring_match_company_contains_key() {
        let domains = resolve("株式会社メルカリ");
        assert_eq!(domains, vec!["mercari.com"]);
    }

    #[test]
    fn test_substring_match_key_contains_query() {
        let domains = resolve("リクル");
        assert_eq!(domains, vec!["recruit.co.jp", "r.recruit.co.jp"]);
    }

    #[test]
    fn test_substring_match_is_table_order_deterministic() {
        // "三" appears in several keys; the first table entry containing
        // it must win every time.
        let first = resolve("三");
        let second = resolve("三");
        assert_eq!(first, second);
        assert_eq!(first, vec!["mufg.jp", "bk.mufg.jp"]);
    }

    #[test]
    fn test_heuristic_strips_corporate_tokens() {
        let domains = resolve("株式会社Acme");
        assert_eq!(
            domains,
            vec![
                "acme.co.jp",
                "acme.com",
                "acme.jp",
                "acme.net",
                "gmail.com"
            ]
        );
    }

    #[test]
    fn test_heuristic_strips_parenthetical_and_whitespace() {
        let domains = resolve("Example Labs (Japan)");
        assert_eq!(domains[0], "examplelabs.co.jp");
        assert_eq!(domains.last().unwrap(), "gmail.com");
    }

    #[test]
    fn test_empty_cleaned_name_returns_catch_all_only() {
        let domains = resolve("株式会社");
        assert_eq!(domains, vec!["gmail.com"]);
    }

    #[test]
    fn test_never_empty_and_deterministic() {
        for name in ["", "   ", "未知の会社", "Globex Corp", "楽天グループ"] {
            let a = resolve(name);
            let b = resolve(name);
            assert!(!a.is_empty(), "empty result for {name:?}");
            assert_eq!(a, b);
        }
    }
}
