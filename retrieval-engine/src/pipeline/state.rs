use state_machines::state_machine;

state_machine! {
    name: SearchMachine,
    state: SearchState,
    initial: Ready,
    states: [Ready, Embedded, Searched, Fused, Completed, Failed],
    events {
        embed { transition: { from: Ready, to: Embedded } }
        search_corpora { transition: { from: Embedded, to: Searched } }
        fuse { transition: { from: Searched, to: Fused } }
        assemble { transition: { from: Fused, to: Completed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Searched, to: Failed }
        }
    }
}

pub fn ready() -> SearchMachine<(), Ready> {
    SearchMachine::new(())
}
