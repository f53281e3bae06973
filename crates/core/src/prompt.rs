//! Prompt assembly.

use crate::providers::AnalysisResult;
use crate::settings::Settings;

/// Instruction block appended to every prompt. Asks for live price
/// validation with Danish resale platforms ranked first.
pub const SEARCH_INSTRUCTIONS: &str = "SØGEINSTRUKTION (VIGTIGT):
Brug Google Search til at finde 2-3 lignende varer til salg online for at validere prisen og finde referencer.
Du SKAL prioritere at finde links fra de danske genbrugsplatforme 'Trendsales' og 'DBA' (Den Blå Avis).
1. Søg specifikt efter varen på Trendsales og DBA først.
2. Kun hvis du ikke finder relevante match på disse platforme, må du inkludere links fra generelle webshops eller internationale sider.
3. Forsøg altid at finde og verificere varens nuværende nypris (priceNew).
4. Inkludér alle fundne links i 'similarLinks' feltet.";

const CONTEXT_HEADER: &str = "BRUGER-KONTEKST (Vigtigt!):";

/// Builds the full prompt: the template with `{language}` and `{currency}`
/// substituted, the search block, and the user context if any.
pub fn build_prompt(settings: &Settings, context: Option<&str>) -> String {
    let mut prompt = settings
        .prompt_template
        .replace("{language}", &settings.language)
        .replace("{currency}", &settings.currency);

    prompt.push_str("\n\n");
    prompt.push_str(SEARCH_INSTRUCTIONS);

    if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\n\n");
        prompt.push_str(CONTEXT_HEADER);
        prompt.push(' ');
        prompt.push_str(context);
    }

    prompt
}

/// Folds the reviewed fields back into a context string for re-estimation.
pub fn reestimate_context(fields: &AnalysisResult) -> String {
    format!(
        "Mærke: {}, Type: {}, Farve: {}, Størrelse: {}. Beskrivelse: {}",
        fields.brand, fields.item_type, fields.color, fields.size, fields.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_every_placeholder() {
        let settings = Settings {
            prompt_template: "Sprog {language}, valuta {currency}, igen {currency}.".to_string(),
            language: "English".to_string(),
            currency: "EUR".to_string(),
            ..Settings::default()
        };

        let prompt = build_prompt(&settings, None);
        assert!(prompt.starts_with("Sprog English, valuta EUR, igen EUR."));
        assert!(prompt.contains("Trendsales"));
        assert!(!prompt.contains(CONTEXT_HEADER));
    }

    #[test]
    fn appends_context_last() {
        let prompt = build_prompt(&Settings::default(), Some("  lille plet på ærmet "));
        assert!(prompt.ends_with("BRUGER-KONTEKST (Vigtigt!): lille plet på ærmet"));
        assert!(!build_prompt(&Settings::default(), Some("   ")).contains(CONTEXT_HEADER));
    }

    #[test]
    fn reestimate_context_lists_fields() {
        let fields = AnalysisResult {
            description: "Nike Air str. 42".to_string(),
            brand: "Nike".to_string(),
            item_type: "Sneakers".to_string(),
            color: "Hvid".to_string(),
            size: "42".to_string(),
            ..AnalysisResult::default()
        };
        assert_eq!(
            reestimate_context(&fields),
            "Mærke: Nike, Type: Sneakers, Farve: Hvid, Størrelse: 42. Beskrivelse: Nike Air str. 42"
        );
    }
}
