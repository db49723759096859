//! Prompt sent alongside each screenshot.

const INSTRUCTIONS: &str = r#"You are a UI automation assistant. Look at the screenshot and propose the next actions that move the task forward.

Return ONLY a JSON object in this format:
{
    "current_screen": "Short description of what is shown",
    "task_complete": false,
    "candidates": [
        {
            "action_type": "click|double_click|right_click|type|scroll|wait",
            "target": {"element": "Element label", "coordinates": {"x": 100, "y": 200}},
            "confidence": 0.95,
            "reasoning": "Why this action helps",
            "text": "Text to type (type only)",
            "amount": -3,
            "duration_ms": 500
        }
    ]
}

Rules:
- Coordinates are screen pixels.
- Confidence is between 0.0 and 1.0. List the most promising action first.
- When the task is already done, set "task_complete" to true and return an empty "candidates" list.
- Never propose actions that pay, place orders or enter payment card details."#;

const DETECTION_INSTRUCTIONS: &str = r#"Analyze this screenshot and determine if it shows a payment screen.
Look for indicators like:
- Payment forms or credit card inputs
- "Pay", "Purchase", "Complete Order" buttons
- Price/amount confirmations
- Payment method selection

Return only "true" or "false"."#;

/// Yes/no question asked before an action is executed.
pub fn build_detection_prompt(screen_description: &str) -> String {
    let mut prompt = String::from(DETECTION_INSTRUCTIONS);
    if !screen_description.trim().is_empty() {
        prompt.push_str("\n\nScreen context: ");
        prompt.push_str(screen_description.trim());
    }
    prompt
}

/// Builds the text part of the request.
pub fn build_prompt(task: &str, screen_description: &str) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    if !task.trim().is_empty() {
        prompt.push_str("\n\nTask: ");
        prompt.push_str(task.trim());
    }
    if !screen_description.trim().is_empty() {
        prompt.push_str("\n\nScreen context: ");
        prompt.push_str(screen_description.trim());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_task_and_context_when_present() {
        let prompt = build_prompt("order item X", "Deliveroo home feed");
        assert!(prompt.contains("Task: order item X"));
        assert!(prompt.contains("Screen context: Deliveroo home feed"));
        assert!(prompt.contains("\"task_complete\""));
    }

    #[test]
    fn detection_prompt_asks_for_a_boolean() {
        let prompt = build_detection_prompt("Basket");
        assert!(prompt.contains("Return only \"true\" or \"false\"."));
        assert!(prompt.ends_with("Screen context: Basket"));
    }

    #[test]
    fn omits_empty_sections() {
        let prompt = build_prompt("  ", "");
        assert!(!prompt.contains("Task:"));
        assert!(!prompt.contains("Screen context:"));
    }
}
