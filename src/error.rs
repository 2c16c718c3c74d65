/*!
Provides a common error implementation, error kind enumeration, and constrained result type.
*/

error_chain! {
    errors {
        #[doc = "The model has not been compiled; call `Model::initialise` first."]
        NotInitialised {
            description("The model has not been compiled; call `Model::initialise` first.")
            display("The model has not been compiled; call `Model::initialise` first.")
        }

        #[doc = "More than one outbound transition guard evaluated true at a junction."]
        MultipleOutboundTransitions(at: String) {
            description("More than one outbound transition guard evaluated true at a junction.")
            display("More than one outbound transition guard evaluated true at `{}`.", at)
        }

        #[doc = "No outbound transition guard passed and no else transition was found."]
        IllFormedBranch(at: String) {
            description("No outbound transition guard passed and no else transition was found.")
            display("No outbound transition guard passed and no else transition at `{}`.", at)
        }

        #[doc = "Transition selection is only defined for choice and junction pseudo-states."]
        NotABranch(at: String) {
            description("Transition selection is only defined for choice and junction pseudo-states.")
            display("Transition selection attempted at non-branch vertex `{}`.", at)
        }
    }
}
