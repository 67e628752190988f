#![allow(dead_code)]

use tokenshift::dsl::ProcessDefinition;
use tokenshift::dsl::builder::ProcessBuilder;
use tokenshift::runtime::execution::Execution;

/// theStart -> taskBefore -> fork -> (task1 | task2) -> parallelJoin -> taskAfter -> theEnd
pub fn parallel_task() -> ProcessDefinition {
    ProcessBuilder::new("parallelTask")
        .start("theStart")
        .task("taskBefore")
        .parallel_gateway("fork")
        .task("task1")
        .task("task2")
        .parallel_gateway("parallelJoin")
        .task("taskAfter")
        .end("theEnd")
        .connect("theStart", "taskBefore")
        .connect("taskBefore", "fork")
        .connect("fork", "task1")
        .connect("fork", "task2")
        .connect("task1", "parallelJoin")
        .connect("task2", "parallelJoin")
        .connect("parallelJoin", "taskAfter")
        .connect("taskAfter", "theEnd")
        .build()
}

/// Same shape as `parallel_task` with inclusive gateways.
pub fn inclusive_fork_join() -> ProcessDefinition {
    ProcessBuilder::new("inclusiveGatewayForkJoin")
        .start("theStart")
        .task("taskBefore")
        .inclusive_gateway("gwFork")
        .task("task1")
        .task("task2")
        .inclusive_gateway("gwJoin")
        .task("taskAfter")
        .end("theEnd")
        .connect("theStart", "taskBefore")
        .connect("taskBefore", "gwFork")
        .connect("gwFork", "task1")
        .connect("gwFork", "task2")
        .connect("task1", "gwJoin")
        .connect("task2", "gwJoin")
        .connect("gwJoin", "taskAfter")
        .connect("taskAfter", "theEnd")
        .build()
}

/// Two single-task sub-processes between a parallel fork and join.
pub fn parallel_sub_processes() -> ProcessDefinition {
    ProcessBuilder::new("parallelSubProcesses")
        .start("theStart")
        .task("taskBefore")
        .parallel_gateway("fork")
        .sub_process("subProcess1")
            .start("subStart")
            .task("subtask")
            .end("subEnd")
            .connect("subStart", "subtask")
            .connect("subtask", "subEnd")
            .done()
        .sub_process("subProcess2")
            .start("subStart2")
            .task("subtask2")
            .end("subEnd2")
            .connect("subStart2", "subtask2")
            .connect("subtask2", "subEnd2")
            .done()
        .parallel_gateway("parallelJoin")
        .task("taskAfter")
        .end("theEnd")
        .connect("theStart", "taskBefore")
        .connect("taskBefore", "fork")
        .connect("fork", "subProcess1")
        .connect("fork", "subProcess2")
        .connect("subProcess1", "parallelJoin")
        .connect("subProcess2", "parallelJoin")
        .connect("parallelJoin", "taskAfter")
        .connect("taskAfter", "theEnd")
        .build()
}

fn sub_process_pair(builder: ProcessBuilder) -> ProcessBuilder {
    builder
        .sub_process("subProcess1")
            .start("subStart")
            .task("subtask")
            .task("subtask2")
            .end("subEnd")
            .connect("subStart", "subtask")
            .connect("subtask", "subtask2")
            .connect("subtask2", "subEnd")
            .done()
        .sub_process("subProcess2")
            .start("subStart2")
            .task("subtask3")
            .end("subEnd2")
            .connect("subStart2", "subtask3")
            .connect("subtask3", "subEnd2")
            .done()
}

/// subProcess1 runs subtask then subtask2, subProcess2 runs subtask3.
pub fn parallel_sub_processes_multiple_tasks() -> ProcessDefinition {
    sub_process_pair(
        ProcessBuilder::new("parallelSubProcessesMultipleTasks")
            .start("theStart")
            .task("taskBefore")
            .parallel_gateway("fork")
    )
        .parallel_gateway("parallelJoin")
        .task("taskAfter")
        .end("theEnd")
        .connect("theStart", "taskBefore")
        .connect("taskBefore", "fork")
        .connect("fork", "subProcess1")
        .connect("fork", "subProcess2")
        .connect("subProcess1", "parallelJoin")
        .connect("subProcess2", "parallelJoin")
        .connect("parallelJoin", "taskAfter")
        .connect("taskAfter", "theEnd")
        .build()
}

/// An inclusive fork whose first branch runs the sub-process pair in parallel.
/// `taskInclusive2` needs `var1 == "test"`, `taskInclusive3` needs `var1 == "test2"`.
pub fn multiple_parallel_sub_processes() -> ProcessDefinition {
    sub_process_pair(
        ProcessBuilder::new("multipleParallelSubProcesses")
            .start("theStart")
            .task("taskBefore")
            .inclusive_gateway("inclusiveFork")
            .task("taskInclusive1")
            .task("taskInclusive2")
            .task("taskInclusive3")
            .parallel_gateway("parallelFork")
    )
        .parallel_gateway("parallelJoin")
        .inclusive_gateway("inclusiveJoin")
        .task("taskAfter")
        .end("theEnd")
        .connect("theStart", "taskBefore")
        .connect("taskBefore", "inclusiveFork")
        .connect("inclusiveFork", "taskInclusive1")
        .connect_if("inclusiveFork", "taskInclusive2", "${var1 == \"test\"}")
        .connect_if("inclusiveFork", "taskInclusive3", "${var1 == \"test2\"}")
        .connect("taskInclusive1", "parallelFork")
        .connect("parallelFork", "subProcess1")
        .connect("parallelFork", "subProcess2")
        .connect("subProcess1", "parallelJoin")
        .connect("subProcess2", "parallelJoin")
        .connect("parallelJoin", "inclusiveJoin")
        .connect("taskInclusive2", "inclusiveJoin")
        .connect("taskInclusive3", "inclusiveJoin")
        .connect("inclusiveJoin", "taskAfter")
        .connect("taskAfter", "theEnd")
        .build()
}

/// Sorted activity ids, for order-independent assertions.
pub fn activities(executions: &[Execution]) -> Vec<String> {
    let mut ids: Vec<String> = executions.iter()
        .filter_map(|e| e.activity_id.clone())
        .collect();
    ids.sort();
    ids
}

pub fn sorted(ids: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
    ids.sort();
    ids
}
