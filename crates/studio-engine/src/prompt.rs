use log::warn;
use studio_contracts::generation::GenerationRequest;
use studio_contracts::request::StyleDirectives;

use crate::imaging::{prepare_for_upload, UploadImage};

/// One piece of the multi-part generation prompt, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Image(UploadImage),
}

/// Header, then a labelled image per reference in rank order, then the
/// instruction block. References that cannot be re-encoded are left out and
/// the labels number only the images actually sent.
pub fn build_prompt_parts(request: &GenerationRequest, max_dim: u32) -> Vec<PromptPart> {
    let images: Vec<UploadImage> = request
        .references()
        .iter()
        .filter_map(|reference| {
            let upload = prepare_for_upload(&reference.bytes, &reference.content_type, max_dim);
            if upload.is_none() {
                warn!(
                    "leaving reference rank {} out of the prompt: {} cannot be re-encoded",
                    reference.rank(),
                    reference.content_type
                );
            }
            upload
        })
        .collect();

    let mut parts = Vec::new();
    let header = if images.is_empty() {
        format!(
            "TASK: Generate an image of `{}`.\n\nNo reference photographs are available; \
             rely on the layout sketch and style directives below.",
            request.subject()
        )
    } else {
        format!(
            "TASK: Generate an image of `{}`.\n\nHere are the reference images:",
            request.subject()
        )
    };
    parts.push(PromptPart::Text(header));

    for (position, image) in images.into_iter().enumerate() {
        parts.push(PromptPart::Text(format!(
            "\n**Reference Image {}:** use for structure and visual grounding only; \
             do not reproduce it verbatim.",
            position + 1
        )));
        parts.push(PromptPart::Image(image));
    }

    parts.push(PromptPart::Text(instruction_block(request)));
    parts
}

fn instruction_block(request: &GenerationRequest) -> String {
    let mut text = String::from(
        "\nINSTRUCTIONS:\n\
         1. First, analyze the reference image(s) above to identify the key product components, \
         structure, and visual style.\n   \
         Note: Reference images may contain errors or be irrelevant. If a reference image clearly \
         conflicts with the subject description or appears unrelated, ignore that specific image or element.\n\
         2. Second, understand the specific product details that make this item unique; accurate \
         components matter.\n\
         3. Third, plan the composition and layout that best presents this subject.\n\
         4. Finally, generate the image combining accurate product details with professional presentation.",
    );

    let style = style_block(request.directives());
    if !style.is_empty() {
        text.push_str("\n\nSTYLE:\n");
        text.push_str(&style);
    }

    text.push_str(&format!(
        "\n\nOUTPUT:\n- Aspect ratio {}\n- Detail tier {} ({})",
        request.aspect_ratio(),
        request.detail(),
        request.detail().provider_size()
    ));
    if request.count() > 1 {
        text.push_str(&format!(
            "\n- {} distinct variations of the same subject",
            request.count()
        ));
    }
    text.push_str("\n\nDo not include the subject title text in the image unless explicitly requested.");
    text
}

fn style_block(directives: &StyleDirectives) -> String {
    let mut lines = Vec::new();
    if let Some(needs) = &directives.needs {
        lines.push(format!(
            "- Style: {}. {}",
            needs.style.label(),
            needs.style.guidance()
        ));
        if !needs.colors.is_empty() {
            lines.push(format!(
                "- Use exactly this colour palette: {}",
                needs.colors.join(", ")
            ));
        }
        if !needs.labels.is_empty() {
            let quoted = needs
                .labels
                .iter()
                .map(|label| format!("\"{label}\""))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!(
                "- Render these labels legibly and spelled exactly: {quoted}"
            ));
        }
        if let Some(sketch) = &needs.ascii_sketch {
            lines.push(format!(
                "- Follow this layout sketch:\n```\n{}\n```",
                sketch.trim_end()
            ));
        }
    }
    if let Some(instructions) = &directives.instructions {
        lines.push(format!("- Apply styling: {instructions}"));
    }
    lines.join("\n")
}

/// Prompt as it will be sent, with image bytes replaced by placeholders.
pub fn render_for_debug(parts: &[PromptPart]) -> String {
    parts
        .iter()
        .enumerate()
        .map(|(index, part)| match part {
            PromptPart::Text(text) => format!("parts[{index}] text:\n{text}"),
            PromptPart::Image(image) => format!(
                "parts[{index}] <image bytes: {} bytes, {}>",
                image.bytes.len(),
                image.mime_type
            ),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use studio_contracts::generation::GenerationRequest;
    use studio_contracts::request::{AspectRatio, CreationNeeds, StyleDirectives};

    use super::{build_prompt_parts, render_for_debug, PromptPart};
    use crate::testing::{fetched, job_spec};

    fn text_of(parts: &[PromptPart]) -> String {
        parts
            .iter()
            .filter_map(|part| match part {
                PromptPart::Text(text) => Some(text.as_str()),
                PromptPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn references_are_labelled_in_rank_order() {
        let request = GenerationRequest::new(&job_spec(), fetched(&[1, 4]));
        let parts = build_prompt_parts(&request, 3072);
        assert_eq!(parts.len(), 6);
        assert!(matches!(&parts[0], PromptPart::Text(text) if text.contains("`steel pipe bracket exploded view`")));
        assert!(matches!(&parts[1], PromptPart::Text(text) if text.contains("Reference Image 1")));
        assert!(matches!(parts[2], PromptPart::Image(_)));
        assert!(matches!(&parts[3], PromptPart::Text(text) if text.contains("Reference Image 2")));
        assert!(matches!(parts[4], PromptPart::Image(_)));
    }

    #[test]
    fn style_block_carries_palette_labels_and_sketch() -> anyhow::Result<()> {
        let needs = CreationNeeds::from_json(
            r##"{"colors":["#333333","#ffffff"],"style":"technical diagram","labels":["Bracket","Bolt"],"ascii_sketch":"[A]--[B]"}"##,
        )?;
        let job = job_spec()
            .with_directives(StyleDirectives::new(Some("matte finish".to_string()), Some(needs)))
            .with_aspect_ratio(AspectRatio::Square);
        let request = GenerationRequest::new(&job, fetched(&[0]));
        let text = text_of(&build_prompt_parts(&request, 3072));
        assert!(text.contains("Style: technical diagram."));
        assert!(text.contains("#333333, #ffffff"));
        assert!(text.contains("\"Bracket\", \"Bolt\""));
        assert!(text.contains("```\n[A]--[B]\n```"));
        assert!(text.contains("Apply styling: matte finish"));
        assert!(text.contains("Aspect ratio 1:1"));
        assert!(text.contains("Detail tier 1k (1K)"));
        assert!(text.contains("Do not include the subject title text"));
        Ok(())
    }

    #[test]
    fn undecodable_references_are_left_out() {
        let mut references = fetched(&[0, 1]);
        references[0].bytes = b"\x00\x00\x00\x1cftypavif\x00\x00\x00\x00mif1".to_vec();
        references[0].content_type = "image/avif".to_string();
        let request = GenerationRequest::new(&job_spec(), references);
        let parts = build_prompt_parts(&request, 3072);

        let mimes: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                PromptPart::Image(image) => Some(image.mime_type.as_str()),
                PromptPart::Text(_) => None,
            })
            .collect();
        assert_eq!(mimes, vec!["image/jpeg"]);
        let text = text_of(&parts);
        assert!(text.contains("Reference Image 1"));
        assert!(!text.contains("Reference Image 2"));
    }

    #[test]
    fn sketch_only_prompt_has_no_image_parts() {
        let request = GenerationRequest::new(&job_spec(), Vec::new());
        let parts = build_prompt_parts(&request, 3072);
        assert_eq!(parts.len(), 2);
        assert!(text_of(&parts).contains("No reference photographs"));
    }

    #[test]
    fn debug_rendering_hides_image_bytes() {
        let request = GenerationRequest::new(&job_spec(), fetched(&[0]));
        let rendered = render_for_debug(&build_prompt_parts(&request, 3072));
        assert!(rendered.contains("parts[2] <image bytes:"));
        assert!(rendered.contains("parts[0] text:"));
    }
}
