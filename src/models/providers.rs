//! Provider capability flags
//!
//! A worker registration declares which language features it serves. The
//! engine routes a request for a document only to a worker that declared the
//! matching flag.

use serde::{Deserialize, Serialize};

/// Language feature a worker may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Hover,
    CompletionItem,
    Diagnostics,
    DocumentFormattingEdit,
    DocumentRangeFormattingEdit,
    Definition,
    References,
    DocumentSymbol,
    CodeLens,
    SignatureHelp,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Self::Hover,
        Self::CompletionItem,
        Self::Diagnostics,
        Self::DocumentFormattingEdit,
        Self::DocumentRangeFormattingEdit,
        Self::Definition,
        Self::References,
        Self::DocumentSymbol,
        Self::CodeLens,
        Self::SignatureHelp,
    ];

    /// Flag name as used in worker registrations
    pub fn flag_name(&self) -> &'static str {
        match self {
            Self::Hover => "hover",
            Self::CompletionItem => "completionItem",
            Self::Diagnostics => "diagnostics",
            Self::DocumentFormattingEdit => "documentFormattingEdit",
            Self::DocumentRangeFormattingEdit => "documentRangeFormattingEdit",
            Self::Definition => "definition",
            Self::References => "references",
            Self::DocumentSymbol => "documentSymbol",
            Self::CodeLens => "codeLens",
            Self::SignatureHelp => "signatureHelp",
        }
    }

    /// Worker method that serves this capability
    pub fn method(&self) -> &'static str {
        match self {
            Self::Hover => "provideHover",
            Self::CompletionItem => "provideCompletionItems",
            Self::Diagnostics => "doValidation",
            Self::DocumentFormattingEdit => "provideDocumentFormattingEdits",
            Self::DocumentRangeFormattingEdit => "provideDocumentRangeFormattingEdits",
            Self::Definition => "provideDefinition",
            Self::References => "provideReferences",
            Self::DocumentSymbol => "provideDocumentSymbols",
            Self::CodeLens => "provideCodeLenses",
            Self::SignatureHelp => "provideSignatureHelp",
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.method() == method)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.flag_name())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.flag_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown capability: '{}'", s))
    }
}

/// Capability flags declared by a worker registration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Providers {
    pub hover: bool,
    pub completion_item: bool,
    pub diagnostics: bool,
    pub document_formatting_edit: bool,
    pub document_range_formatting_edit: bool,
    pub definition: bool,
    pub references: bool,
    pub document_symbol: bool,
    pub code_lens: bool,
    pub signature_help: bool,
}

impl Providers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.set(capability, true);
        self
    }

    pub fn set(&mut self, capability: Capability, enabled: bool) {
        *self.flag_mut(capability) = enabled;
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Hover => self.hover,
            Capability::CompletionItem => self.completion_item,
            Capability::Diagnostics => self.diagnostics,
            Capability::DocumentFormattingEdit => self.document_formatting_edit,
            Capability::DocumentRangeFormattingEdit => self.document_range_formatting_edit,
            Capability::Definition => self.definition,
            Capability::References => self.references,
            Capability::DocumentSymbol => self.document_symbol,
            Capability::CodeLens => self.code_lens,
            Capability::SignatureHelp => self.signature_help,
        }
    }

    /// Union of two flag sets
    pub fn merge(mut self, other: &Providers) -> Self {
        for capability in Capability::ALL {
            if other.supports(capability) {
                self.set(capability, true);
            }
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.supports(*c))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn flag_mut(&mut self, capability: Capability) -> &mut bool {
        match capability {
            Capability::Hover => &mut self.hover,
            Capability::CompletionItem => &mut self.completion_item,
            Capability::Diagnostics => &mut self.diagnostics,
            Capability::DocumentFormattingEdit => &mut self.document_formatting_edit,
            Capability::DocumentRangeFormattingEdit => &mut self.document_range_formatting_edit,
            Capability::Definition => &mut self.definition,
            Capability::References => &mut self.references,
            Capability::DocumentSymbol => &mut self.document_symbol,
            Capability::CodeLens => &mut self.code_lens,
            Capability::SignatureHelp => &mut self.signature_help,
        }
    }
}

impl FromIterator<Capability> for Providers {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        iter.into_iter().fold(Self::none(), Self::with)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_providers_from_registration_json() {
        let providers: Providers = serde_json::from_value(serde_json::json!({
            "hover": true,
            "documentFormattingEdit": true,
            "completionItem": true,
        }))
        .unwrap();

        assert!(providers.supports(Capability::Hover));
        assert!(providers.supports(Capability::CompletionItem));
        assert!(providers.supports(Capability::DocumentFormattingEdit));
        assert!(!providers.supports(Capability::Diagnostics));
    }

    #[test]
    fn test_merge_is_union() {
        let a = Providers::none().with(Capability::Hover);
        let b = Providers::none().with(Capability::Diagnostics);
        let merged = a.merge(&b);
        assert_eq!(
            merged.iter().collect::<Vec<_>>(),
            vec![Capability::Hover, Capability::Diagnostics]
        );
    }

    #[test]
    fn test_method_lookup() {
        assert_eq!(
            Capability::from_method("provideDocumentFormattingEdits"),
            Some(Capability::DocumentFormattingEdit)
        );
        assert_eq!(Capability::from_method("$initialize"), None);
        assert_eq!(
            "documentformattingedit".parse::<Capability>(),
            Ok(Capability::DocumentFormattingEdit)
        );
    }
}
